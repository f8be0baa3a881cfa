//! # Barcode Issuer
//!
//! Mints redemption tokens and renders them into scannable images.
//!
//! ## Minting
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OsRng ──► 16 random bytes ──► lowercase hex (32 chars)                │
//! │                                     │                                   │
//! │                                     ▼                                   │
//! │                 token_exists_in(tx, token)?                            │
//! │                     │                 │                                 │
//! │                  no │                 │ yes (collision)                 │
//! │                     ▼                 ▼                                 │
//! │                  accept        regenerate (up to MAX_MINT_ATTEMPTS)    │
//! │                                                                         │
//! │  The UNIQUE index on entitlements.barcode_token backs the check.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rendering
//! Rendering happens after the entitlement is committed. A failed render
//! leaves `barcode_image` empty; the entitlement stays valid and the image
//! can be re-rendered from the token at any time.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use qrcode::render::svg;
use qrcode::QrCode;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::warn;
use washpass_core::BARCODE_TOKEN_BYTES;
use washpass_db::{EntitlementRepository, SqliteConnection};

use crate::error::{EngineError, EngineResult};

/// Fresh tokens tried before giving up.
pub const MAX_MINT_ATTEMPTS: u32 = 5;

/// Characters of a token that may appear in logs.
const LOGGED_TOKEN_PREFIX: usize = 6;

/// Generates an unguessable token (128 bits from the OS RNG).
pub fn generate_token() -> String {
    let mut bytes = [0u8; BARCODE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The part of a token that is safe to log.
pub fn token_prefix(token: &str) -> &str {
    token.get(..LOGGED_TOKEN_PREFIX).unwrap_or(token)
}

// =============================================================================
// Renderer
// =============================================================================

#[derive(Debug, Error)]
#[error("Barcode rendering failed: {0}")]
pub struct RenderError(pub String);

/// Turns a token into a scannable image.
#[async_trait]
pub trait BarcodeRenderer: Send + Sync {
    /// Returns the image as a data URL.
    async fn render(&self, token: &str) -> Result<String, RenderError>;
}

/// QR code rendered as SVG, returned as `data:image/svg+xml;base64,...`.
#[derive(Debug, Clone)]
pub struct QrSvgRenderer {
    min_dimensions: u32,
}

impl QrSvgRenderer {
    pub fn new() -> Self {
        QrSvgRenderer { min_dimensions: 240 }
    }

    pub fn with_min_dimensions(min_dimensions: u32) -> Self {
        QrSvgRenderer { min_dimensions }
    }
}

impl Default for QrSvgRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarcodeRenderer for QrSvgRenderer {
    async fn render(&self, token: &str) -> Result<String, RenderError> {
        let code = QrCode::new(token.as_bytes()).map_err(|e| RenderError(e.to_string()))?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(self.min_dimensions, self.min_dimensions)
            .build();
        Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
    }
}

// =============================================================================
// Issuer
// =============================================================================

/// Where candidate tokens come from. [`generate_token`] in production.
pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct BarcodeIssuer {
    entitlements: EntitlementRepository,
    renderer: Arc<dyn BarcodeRenderer>,
    tokens: TokenSource,
}

impl BarcodeIssuer {
    pub fn new(entitlements: EntitlementRepository, renderer: Arc<dyn BarcodeRenderer>) -> Self {
        BarcodeIssuer {
            entitlements,
            renderer,
            tokens: Arc::new(generate_token),
        }
    }

    /// Replaces the random token generator, e.g. with a fixed sequence.
    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    /// Mints a token that no entitlement holds yet, checked on the caller's
    /// transaction.
    pub async fn mint_token_in(&self, conn: &mut SqliteConnection) -> EngineResult<String> {
        for attempt in 1..=MAX_MINT_ATTEMPTS {
            let token = (self.tokens)();
            if !self.entitlements.token_exists_in(&mut *conn, &token).await? {
                return Ok(token);
            }
            warn!(attempt, token_prefix = %token_prefix(&token), "Barcode token collision, regenerating");
        }
        Err(EngineError::TokenExhausted(MAX_MINT_ATTEMPTS))
    }

    /// Renders the image for `token`. A failure is logged and yields `None`.
    pub async fn render_image(&self, token: &str) -> Option<String> {
        match self.renderer.render(token).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(token_prefix = %token_prefix(token), error = %e, "Barcode image rendering failed");
                None
            }
        }
    }

    /// Renders the image for `token`, surfacing the failure.
    pub async fn try_render_image(&self, token: &str) -> Result<String, RenderError> {
        self.renderer.render(token).await
    }
}
