use std::env;

/// Shared secret material for one payment provider's webhook scheme plus
/// its query API.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub wompi_events_secret: String,
    pub wompi_api_base: String,
    pub mercadopago_webhook_secret: String,
    pub mercadopago_access_token: String,
    pub mercadopago_api_base: String,
    pub payu_api_key: String,
    pub payu_merchant_id: String,
    pub payu_api_base: String,
    pub epayco_p_cust_id: String,
    pub epayco_p_key: String,
    pub epayco_api_base: String,
    pub stripe_webhook_secret: String,
    pub stripe_secret_key: String,
    pub stripe_api_base: String,
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub tls_disabled: bool,
}

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub catalog_base_url: String,
    pub providers: ProviderSettings,
    pub smtp: SmtpSettings,
    /// Minutes a promoted waitlist entry has to accept its offer.
    pub waitlist_offer_window_minutes: i64,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let frontend_origin = env::var("FRONTEND_ORIGIN").expect("FRONTEND_ORIGIN must be set");

        let catalog_base_url =
            env::var("CATALOG_BASE_URL").expect("CATALOG_BASE_URL must be set");

        let providers = ProviderSettings {
            wompi_events_secret: var_or("WOMPI_EVENTS_SECRET", ""),
            wompi_api_base: var_or("WOMPI_API_BASE", "https://production.wompi.co/v1"),
            mercadopago_webhook_secret: var_or("MERCADOPAGO_WEBHOOK_SECRET", ""),
            mercadopago_access_token: var_or("MERCADOPAGO_ACCESS_TOKEN", ""),
            mercadopago_api_base: var_or("MERCADOPAGO_API_BASE", "https://api.mercadopago.com"),
            payu_api_key: var_or("PAYU_API_KEY", ""),
            payu_merchant_id: var_or("PAYU_MERCHANT_ID", ""),
            payu_api_base: var_or("PAYU_API_BASE", "https://api.payulatam.com"),
            epayco_p_cust_id: var_or("EPAYCO_P_CUST_ID", ""),
            epayco_p_key: var_or("EPAYCO_P_KEY", ""),
            epayco_api_base: var_or("EPAYCO_API_BASE", "https://secure.epayco.co"),
            stripe_webhook_secret: var_or("STRIPE_WEBHOOK_SECRET", ""),
            stripe_secret_key: var_or("STRIPE_SECRET_KEY", ""),
            stripe_api_base: var_or("STRIPE_API_BASE", "https://api.stripe.com"),
        };

        let smtp = SmtpSettings {
            host: var_or("SMTP_HOST", "localhost"),
            port: var_or("SMTP_PORT", "587").parse().unwrap_or(587),
            username: var_or("SMTP_USERNAME", ""),
            password: var_or("SMTP_PASSWORD", ""),
            from: var_or("SMTP_FROM", "no-reply@localhost"),
            tls_disabled: var_or("SMTP_TLS_DISABLED", "false").to_lowercase() == "true",
        };

        let waitlist_offer_window_minutes = var_or("WAITLIST_OFFER_WINDOW_MINUTES", "1440")
            .parse()
            .unwrap_or(1440);

        Config {
            database_url,
            frontend_origin,
            catalog_base_url,
            providers,
            smtp,
            waitlist_offer_window_minutes,
        }
    }
}
