use crate::config::AddressingConfig;
use crate::error::{Error, Result};

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Deployment policy for turning operator-supplied phone numbers into
/// network addresses.
#[derive(Debug, Clone)]
pub struct AddressPolicy {
    default_country_code: String,
    local_number_len: usize,
    domain_suffix: String,
}

impl AddressPolicy {
    pub fn new(cfg: &AddressingConfig) -> Self {
        Self {
            default_country_code: cfg
                .default_country_code
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect(),
            local_number_len: cfg.local_number_len,
            domain_suffix: cfg.domain_suffix.trim().trim_start_matches('@').to_string(),
        }
    }

    pub fn normalize(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        if let Some((local, domain)) = raw.split_once('@') {
            if local.is_empty() || domain.is_empty() || domain.contains('@') {
                return Err(Error::Validation(format!("malformed address: {raw}")));
            }
            return Ok(raw.to_string());
        }

        let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(Error::Validation(format!("no digits in address: {raw:?}")));
        }
        if digits.len() == self.local_number_len && !self.default_country_code.is_empty() {
            digits = format!("{}{}", self.default_country_code, digits);
        }
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(Error::Validation(format!(
                "invalid phone number length {} for {raw:?}",
                digits.len()
            )));
        }
        Ok(format!("{}@{}", digits, self.domain_suffix))
    }
}

impl Default for AddressPolicy {
    fn default() -> Self {
        Self::new(&AddressingConfig::default())
    }
}
