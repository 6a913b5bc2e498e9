use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The four supported payment rails. Google Play and the App Store are
/// client-initiated (the mobile app purchases and sends us a token to verify);
/// Stripe and Razorpay are server-initiated (we create a hosted checkout and
/// redirect the user to it).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProvider {
    GooglePlay,
    AppStore,
    Stripe,
    Razorpay,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::GooglePlay => "GOOGLE_PLAY",
            PaymentProvider::AppStore => "APP_STORE",
            PaymentProvider::Stripe => "STRIPE",
            PaymentProvider::Razorpay => "RAZORPAY",
        }
    }

    pub fn try_from_str(value: &str) -> Option<Self> {
        match value {
            "GOOGLE_PLAY" => Some(PaymentProvider::GooglePlay),
            "APP_STORE" => Some(PaymentProvider::AppStore),
            "STRIPE" => Some(PaymentProvider::Stripe),
            "RAZORPAY" => Some(PaymentProvider::Razorpay),
            _ => None,
        }
    }

    pub fn is_client_initiated(&self) -> bool {
        matches!(self, PaymentProvider::GooglePlay | PaymentProvider::AppStore)
    }

    /// Webhooks from client-initiated rails arrive over a pre-verified channel
    /// (Pub/Sub push, signed JWS) and must always be acknowledged with 200;
    /// server-initiated rails carry an HMAC signature we verify ourselves.
    pub fn requires_webhook_signature(&self) -> bool {
        !self.is_client_initiated()
    }
}

impl Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
