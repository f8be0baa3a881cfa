//! # Referral Reward Coordinator
//!
//! Referral enrollment and the one-time reward on an invitee's first
//! purchase.
//!
//! ## Reward Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  maybe_reward(invitee, new_entitlement)                                 │
//! │                                                                         │
//! │  account.referred_by? ───── none ──► NotReferred                       │
//! │  pending referral?    ───── none ──► NoPendingReferral                 │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    referral pending → rewarded  (CAS, first write)                     │
//! │         │ 0 rows ──► ROLLBACK ──► AlreadyRewarded                      │
//! │         ▼                                                               │
//! │    inviter: top up most recent active entitlement (+2)                 │
//! │             or create a reward entitlement (2 units, 30 days, no car)  │
//! │    invitee: top up the new entitlement (+2)                            │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Top-ups never change expiry or status.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use washpass_core::validation::{normalize_referral_code, validate_identifier};
use washpass_core::{
    CoreError, NotificationDraft, NotificationKind, PackageDefinition, Referral, ReferralStatus,
    ReferralSummary, REFERRAL_CODE_BYTES, REFERRAL_REWARD_PACKAGE_ID,
};
use washpass_db::{Database, SqliteConnection};

use crate::config::RewardsConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::store::EntitlementStore;

/// Fresh referral codes tried before giving up.
const MAX_CODE_ATTEMPTS: u32 = 5;

/// Generates a random referral code (12 lowercase hex characters).
pub fn generate_referral_code() -> String {
    let mut bytes = [0u8; REFERRAL_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// How a bonus reached an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BonusGrant {
    /// Units added to an existing active entitlement.
    TopUp { entitlement_id: String },
    /// A new reward entitlement was created.
    Created { entitlement_id: String },
}

impl BonusGrant {
    pub fn entitlement_id(&self) -> &str {
        match self {
            BonusGrant::TopUp { entitlement_id } | BonusGrant::Created { entitlement_id } => {
                entitlement_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewardOutcome {
    /// The account has no inviter.
    NotReferred,
    /// The account has an inviter but no pending referral.
    NoPendingReferral,
    /// Another call already rewarded this referral.
    AlreadyRewarded,
    Rewarded {
        referral_id: String,
        inviter: BonusGrant,
        invitee: BonusGrant,
    },
}

#[derive(Clone)]
pub struct ReferralCoordinator {
    db: Database,
    store: EntitlementStore,
    notifier: Notifier,
    rewards: RewardsConfig,
}

impl ReferralCoordinator {
    pub fn new(
        db: Database,
        store: EntitlementStore,
        notifier: Notifier,
        rewards: RewardsConfig,
    ) -> Self {
        ReferralCoordinator {
            db,
            store,
            notifier,
            rewards,
        }
    }

    // =========================================================================
    // Reward
    // =========================================================================

    /// Grants the referral bonus for `invitee_user_id`'s first entitlement.
    ///
    /// Safe to call any number of times: only the call that moves the
    /// referral from pending to rewarded grants anything.
    pub async fn maybe_reward(
        &self,
        invitee_user_id: &str,
        new_entitlement_id: &str,
    ) -> EngineResult<RewardOutcome> {
        let Some(account) = self.db.accounts().find_by_id(invitee_user_id).await? else {
            return Ok(RewardOutcome::NotReferred);
        };
        let Some(referred_by) = account.referred_by else {
            return Ok(RewardOutcome::NotReferred);
        };

        let Some(referral) = self
            .db
            .referrals()
            .find_pending_by_invitee(invitee_user_id)
            .await?
        else {
            debug!(invitee = %invitee_user_id, "Referred account has no pending referral");
            return Ok(RewardOutcome::NoPendingReferral);
        };

        if referral.inviter_user_id != referred_by {
            warn!(
                referral_id = %referral.id,
                inviter = %referral.inviter_user_id,
                referred_by = %referred_by,
                "Referral inviter differs from account link, rewarding the referral's inviter"
            );
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if !self
            .db
            .referrals()
            .mark_rewarded_in(&mut tx, &referral.id, now)
            .await?
        {
            tx.rollback().await?;
            debug!(referral_id = %referral.id, "Referral already rewarded");
            return Ok(RewardOutcome::AlreadyRewarded);
        }

        let inviter = self
            .grant_bonus_in(&mut tx, &referral.inviter_user_id, None, now)
            .await?;
        let invitee = self
            .grant_bonus_in(&mut tx, invitee_user_id, Some(new_entitlement_id), now)
            .await?;

        tx.commit().await?;

        info!(
            referral_id = %referral.id,
            inviter = %referral.inviter_user_id,
            invitee = %invitee_user_id,
            bonus_units = self.rewards.bonus_units,
            "Referral rewarded"
        );

        // Reward entitlements get their image once committed
        for grant in [&inviter, &invitee] {
            if let BonusGrant::Created { entitlement_id } = grant {
                match self.store.find_by_id(entitlement_id).await {
                    Ok(entitlement) => {
                        self.store.attach_image(entitlement).await;
                    }
                    Err(e) => warn!(entitlement_id = %entitlement_id, error = %e, "Reward entitlement not readable"),
                }
            }
        }

        self.notify_rewarded(&referral.inviter_user_id, &inviter, "Your friend made their first purchase");
        self.notify_rewarded(invitee_user_id, &invitee, "Welcome bonus from your referral");

        Ok(RewardOutcome::Rewarded {
            referral_id: referral.id,
            inviter,
            invitee,
        })
    }

    /// Adds the bonus to `preferred` if it is still active, otherwise to the
    /// owner's most recent active entitlement, otherwise creates a reward
    /// entitlement.
    async fn grant_bonus_in(
        &self,
        conn: &mut SqliteConnection,
        owner_user_id: &str,
        preferred: Option<&str>,
        now: DateTime<Utc>,
    ) -> EngineResult<BonusGrant> {
        let repo = self.db.entitlements();
        let units = self.rewards.bonus_units;

        if let Some(entitlement_id) = preferred {
            if repo.add_units_in(&mut *conn, entitlement_id, units, now).await? {
                return Ok(BonusGrant::TopUp {
                    entitlement_id: entitlement_id.to_string(),
                });
            }
        }

        if let Some(active) = repo.most_recent_active_in(&mut *conn, owner_user_id, now).await? {
            if repo.add_units_in(&mut *conn, &active.id, units, now).await? {
                return Ok(BonusGrant::TopUp {
                    entitlement_id: active.id,
                });
            }
        }

        let entitlement = self
            .store
            .create_in(&mut *conn, owner_user_id, &self.reward_package(), None, now)
            .await?;
        Ok(BonusGrant::Created {
            entitlement_id: entitlement.id,
        })
    }

    /// The reserved catalog entry reward entitlements point at, sized by
    /// configuration.
    fn reward_package(&self) -> PackageDefinition {
        PackageDefinition {
            id: REFERRAL_REWARD_PACKAGE_ID.to_string(),
            name: "Referral reward".to_string(),
            wash_units: self.rewards.bonus_units,
            validity_days: self.rewards.reward_validity_days,
            required_car_class: None,
            price_cents: 0,
        }
    }

    fn notify_rewarded(&self, user_id: &str, grant: &BonusGrant, message: &str) {
        self.notifier.send(NotificationDraft {
            user_id: user_id.to_string(),
            kind: NotificationKind::Referral,
            message: format!("{}: {} free washes added", message, self.rewards.bonus_units),
            related_entity_id: Some(grant.entitlement_id().to_string()),
        });
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    /// The account's referral code, generated on first request.
    pub async fn referral_code(&self, user_id: &str) -> EngineResult<String> {
        let user_id = validate_identifier("user_id", user_id)?;
        let accounts = self.db.accounts();
        accounts.ensure(&user_id, Utc::now()).await?;

        for _ in 0..MAX_CODE_ATTEMPTS {
            if let Some(code) = self.existing_code(&user_id).await? {
                return Ok(code);
            }

            let code = generate_referral_code();
            match accounts.set_referral_code_if_absent(&user_id, &code).await {
                Ok(true) => {
                    info!(account_id = %user_id, "Referral code assigned");
                    return Ok(code);
                }
                // Set concurrently; the loop re-reads it
                Ok(false) => continue,
                Err(e) if e.is_unique_violation_on("accounts.referral_code") => {
                    warn!(account_id = %user_id, "Referral code collision, regenerating");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.existing_code(&user_id).await?.ok_or_else(|| {
            EngineError::Internal("could not assign a unique referral code".to_string())
        })
    }

    async fn existing_code(&self, user_id: &str) -> EngineResult<Option<String>> {
        Ok(self
            .db
            .accounts()
            .find_by_id(user_id)
            .await?
            .and_then(|account| account.referral_code))
    }

    /// Links `user_id` to the owner of `raw_code` with a pending referral.
    pub async fn accept_referral(&self, user_id: &str, raw_code: &str) -> EngineResult<Referral> {
        let user_id = validate_identifier("user_id", user_id)?;
        let code = normalize_referral_code(raw_code)?;

        let inviter = self
            .db
            .accounts()
            .find_by_referral_code(&code)
            .await?
            .ok_or(CoreError::ReferralCodeNotFound)?;
        if inviter.id == user_id {
            return Err(CoreError::SelfReferral.into());
        }

        let now = Utc::now();
        self.db.accounts().ensure(&user_id, now).await?;

        let mut tx = self.db.begin().await?;
        if !self
            .db
            .accounts()
            .set_referred_by_in(&mut tx, &user_id, &inviter.id)
            .await?
        {
            tx.rollback().await?;
            return Err(CoreError::AlreadyReferred.into());
        }

        let referral = Referral {
            id: Uuid::new_v4().to_string(),
            inviter_user_id: inviter.id.clone(),
            invitee_user_id: user_id.clone(),
            status: ReferralStatus::Pending,
            created_at: now,
            rewarded_at: None,
        };
        match self.db.referrals().insert_in(&mut tx, &referral).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation_on("referrals.invitee_user_id") => {
                tx.rollback().await?;
                return Err(CoreError::AlreadyReferred.into());
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit().await?;

        info!(referral_id = %referral.id, inviter = %inviter.id, invitee = %user_id, "Referral accepted");
        Ok(referral)
    }

    /// Referrals sent and received by `user_id`.
    pub async fn referral_status(&self, user_id: &str) -> EngineResult<ReferralSummary> {
        let user_id = validate_identifier("user_id", user_id)?;
        let account = self
            .db
            .accounts()
            .find_by_id(&user_id)
            .await?
            .ok_or_else(|| CoreError::AccountNotFound(user_id.clone()))?;
        let user_id = user_id.as_str();

        Ok(ReferralSummary {
            referral_code: account.referral_code,
            sent: self.db.referrals().list_by_inviter(user_id).await?,
            received: self.db.referrals().find_by_invitee(user_id).await?,
        })
    }
}
