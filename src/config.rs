use clap::Parser;
use std::time::Duration;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "learning-hub")]
#[command(about = "Catalog service for tagged learning resources")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Rate limit max requests per window (per client)
    #[arg(long, env = "RATE_LIMIT", default_value_t = 60)]
    pub rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Shared secret for admin-only routes
    #[arg(long, env = "ADMIN_SECRET", default_value = "your-admin-secret-key")]
    pub admin_secret: String,

    // Valid products (comma-separated)
    // Example: "ecomm,admin,crm"
    #[arg(long, env = "PRODUCTS", default_value = "ecomm,admin,crm")]
    pub products: String,

    // Deadline for a whole request, ledger updates included
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    // Attempts per tag transaction before giving up on a conflict
    #[arg(long, env = "TX_MAX_ATTEMPTS", default_value_t = 5)]
    pub tx_max_attempts: u32,

    // Base URL used when building links to uploaded files
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8080")]
    pub public_base_url: String,

    // Use the first X-Forwarded-For entry as the client identity
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = false)]
    pub trust_forwarded_for: bool,
}

impl Args {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn product_list(&self) -> Vec<String> {
        self.products
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit: 60,
            rate_window: 60,
            admin_secret: "your-admin-secret-key".to_string(),
            products: "ecomm,admin,crm".to_string(),
            request_timeout_secs: 10,
            tx_max_attempts: 5,
            public_base_url: "http://localhost:8080".to_string(),
            trust_forwarded_for: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_list_is_trimmed_and_lowercased() {
        let args = Args {
            products: " Ecomm, ,crm ".to_string(),
            ..Args::default()
        };
        assert_eq!(args.product_list(), vec!["ecomm", "crm"]);
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "learning-hub",
            "--port",
            "9000",
            "--rate-limit",
            "3",
            "--rate-window",
            "5",
            "--trust-forwarded-for",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.rate_limit, 3);
        assert_eq!(args.rate_window(), Duration::from_secs(5));
        assert!(args.trust_forwarded_for);
    }
}
