use anyhow::Result;

use super::config_model::{
    AppStore, Auth, Billing, Database, Device, DotEnvyConfig, GooglePlay, Razorpay, Server, Stripe,
};

/// Loads the full configuration from the environment. Provider sections are
/// optional: a rail whose keys are absent simply is not registered.
pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let auth = Auth {
        jwt_secret: std::env::var("JWT_SECRET").expect("JWT_SECRET is invalid"),
    };

    let billing = Billing {
        grace_period_days: std::env::var("BILLING_GRACE_PERIOD_DAYS")
            .unwrap_or("7".to_string())
            .parse()?,
        max_failed_payments: std::env::var("BILLING_MAX_FAILED_PAYMENTS")
            .unwrap_or("3".to_string())
            .parse()?,
    };

    let device = Device {
        jwt_secret: std::env::var("DEVICE_JWT_SECRET").expect("DEVICE_JWT_SECRET is invalid"),
        token_ttl_days: std::env::var("DEVICE_TOKEN_TTL_DAYS")
            .unwrap_or("30".to_string())
            .parse()?,
        offline_grace_minutes: std::env::var("DEVICE_OFFLINE_GRACE_MINUTES")
            .unwrap_or("1440".to_string())
            .parse()?,
    };

    let stripe = std::env::var("STRIPE_SECRET_KEY").ok().map(|secret_key| Stripe {
        secret_key,
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .expect("STRIPE_WEBHOOK_SECRET is invalid"),
        success_url: std::env::var("STRIPE_SUCCESS_URL").expect("STRIPE_SUCCESS_URL is invalid"),
        cancel_url: std::env::var("STRIPE_CANCEL_URL").expect("STRIPE_CANCEL_URL is invalid"),
    });

    let razorpay = std::env::var("RAZORPAY_KEY_ID").ok().map(|key_id| Razorpay {
        key_id,
        key_secret: std::env::var("RAZORPAY_KEY_SECRET").expect("RAZORPAY_KEY_SECRET is invalid"),
        webhook_secret: std::env::var("RAZORPAY_WEBHOOK_SECRET")
            .expect("RAZORPAY_WEBHOOK_SECRET is invalid"),
    });

    let google_play = std::env::var("GOOGLE_PLAY_PACKAGE_NAME")
        .ok()
        .map(|package_name| GooglePlay {
            package_name,
            service_account_email: std::env::var("GOOGLE_PLAY_SERVICE_ACCOUNT_EMAIL")
                .expect("GOOGLE_PLAY_SERVICE_ACCOUNT_EMAIL is invalid"),
            service_account_key_pem: std::env::var("GOOGLE_PLAY_SERVICE_ACCOUNT_KEY_PEM")
                .expect("GOOGLE_PLAY_SERVICE_ACCOUNT_KEY_PEM is invalid"),
        });

    let app_store = std::env::var("APP_STORE_SHARED_SECRET")
        .ok()
        .map(|shared_secret| AppStore {
            shared_secret,
            issuer_id: std::env::var("APP_STORE_ISSUER_ID").expect("APP_STORE_ISSUER_ID is invalid"),
            key_id: std::env::var("APP_STORE_KEY_ID").expect("APP_STORE_KEY_ID is invalid"),
            private_key_pem: std::env::var("APP_STORE_PRIVATE_KEY_PEM")
                .expect("APP_STORE_PRIVATE_KEY_PEM is invalid"),
            bundle_id: std::env::var("APP_STORE_BUNDLE_ID").expect("APP_STORE_BUNDLE_ID is invalid"),
        });

    Ok(DotEnvyConfig {
        server,
        database,
        auth,
        billing,
        device,
        stripe,
        razorpay,
        google_play,
        app_store,
    })
}
