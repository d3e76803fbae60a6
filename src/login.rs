use super::*;

/// Payout scheme tag carried on each port and stamped onto sessions; only
/// external accounting consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    #[display("pplns")]
    Pplns,
    #[display("pps")]
    Pps,
    #[display("solo")]
    Solo,
    #[display("prop")]
    Prop,
}

/// Rejection strings sent to miners that fail authentication. The display
/// strings are client-visible.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[snafu(display("No login/password specified"))]
    MissingCredentials,
    #[snafu(display("Too many options in the login field"))]
    TooManyLoginOptions,
    #[snafu(display("Too many options in the password field"))]
    TooManyPasswordOptions,
    #[snafu(display("Invalid fixed difficulty in the login field"))]
    BadFixedDifficulty,
    #[snafu(display("Invalid payment address provided"))]
    InvalidAddress,
    #[snafu(display("Banned payment address provided"))]
    BannedAddress,
    #[snafu(display("Exchange addresses need payment IDs"))]
    ExchangeNeedsPaymentId,
}

/// Parsed login/password pair.
///
/// Login layout: `<address>[.<payment id | difficulty | worker>][+<difficulty>]`
/// Password layout: `<worker>[:<email>]`
///
/// A 64-hex second login segment is a payment id, a numeric one is a fixed
/// difficulty request, anything else names the worker. A password of `x`
/// defers to the worker name embedded in the login, when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogin {
    pub address: String,
    pub identifier: String,
    pub payment_id: Option<String>,
    pub fixed_difficulty: Option<u64>,
    pub email: Option<String>,
}

impl ParsedLogin {
    pub fn parse(login: &str, pass: &str) -> Result<Self, LoginError> {
        let diff_split: Vec<&str> = login.split('+').collect();

        if diff_split.len() > 2 {
            return Err(LoginError::TooManyLoginOptions);
        }

        let mut fixed_difficulty = match diff_split.get(1) {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| LoginError::BadFixedDifficulty)?),
            None => None,
        };

        let address_split: Vec<&str> = diff_split[0].split('.').collect();
        let address = address_split[0].to_string();

        let mut payment_id = None;
        let mut embedded_worker = None;

        if let Some(second) = address_split.get(1) {
            if second.len() == 64 && second.chars().all(|c| c.is_ascii_hexdigit()) {
                payment_id = Some(second.to_string());
            } else if !second.is_empty() && second.chars().all(|c| c.is_ascii_digit()) {
                fixed_difficulty = Some(
                    second
                        .parse::<u64>()
                        .map_err(|_| LoginError::BadFixedDifficulty)?,
                );
            } else {
                embedded_worker = Some(second.to_string());
            }
        }

        if let Some(third) = address_split.get(2) {
            embedded_worker = Some(third.to_string());
        }

        let pass_split: Vec<&str> = pass.split(':').collect();

        if pass_split.len() > 2 {
            return Err(LoginError::TooManyPasswordOptions);
        }

        let identifier = match (pass_split[0], embedded_worker) {
            ("x", Some(worker)) => worker,
            (password, _) => password.to_string(),
        };

        let email = pass_split.get(1).map(|email| email.to_string());

        Ok(Self {
            address,
            identifier,
            payment_id,
            fixed_difficulty,
            email,
        })
    }

    /// The payout identity reported to accounting: the address alone, or
    /// `address.payment_id` for integrated payouts.
    pub fn payout(&self) -> String {
        match &self.payment_id {
            Some(payment_id) => format!("{}.{}", self.address, payment_id),
            None => self.address.clone(),
        }
    }
}
