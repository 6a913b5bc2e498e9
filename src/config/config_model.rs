#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub auth: Auth,
    pub billing: Billing,
    pub device: Device,
    pub stripe: Option<Stripe>,
    pub razorpay: Option<Razorpay>,
    pub google_play: Option<GooglePlay>,
    pub app_store: Option<AppStore>,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: usize,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct Billing {
    pub grace_period_days: i64,
    pub max_failed_payments: i32,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub jwt_secret: String,
    pub token_ttl_days: i64,
    pub offline_grace_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct Razorpay {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct GooglePlay {
    pub package_name: String,
    pub service_account_email: String,
    pub service_account_key_pem: String,
}

#[derive(Debug, Clone)]
pub struct AppStore {
    pub shared_secret: String,
    pub issuer_id: String,
    pub key_id: String,
    pub private_key_pem: String,
    pub bundle_id: String,
}
