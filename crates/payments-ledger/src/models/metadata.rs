use serde::{Deserialize, Serialize};

use super::MilliSatoshi;

/// Side information attached to a payment, stored apart from the payment row.
///
/// Protocol fields (`lnurl`, `original_fiat`) are written when the payment is
/// created. User fields (`user_description`, `user_notes`) may be edited at any
/// later time. Neither writer overwrites the other's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub lnurl: Option<LnurlPayMetadata>,
    pub original_fiat: Option<ExchangeRate>,
    pub user_description: Option<String>,
    pub user_notes: Option<String>,
    pub modified_at: Option<i64>,
}

impl PaymentMetadata {
    pub fn is_empty(&self) -> bool {
        self.lnurl.is_none()
            && self.original_fiat.is_none()
            && self.user_description.is_none()
            && self.user_notes.is_none()
    }
}

/// Fiat price of one bitcoin when the payment was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// ISO 4217 currency code.
    pub fiat_currency: String,
    pub price: f64,
}

/// Context of a payment made through an LNURL-pay service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPayMetadata {
    pub pay: LnurlPay,
    pub description: String,
    pub metadata: LnurlMetadata,
    pub success_action: Option<LnurlSuccessAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlPay {
    /// LNURL the user scanned.
    pub initial_url: String,
    pub callback: String,
    pub min_sendable: MilliSatoshi,
    pub max_sendable: MilliSatoshi,
    pub max_comment_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnurlMetadata {
    /// Metadata string as returned by the service.
    pub raw: String,
    pub plain_text: String,
    pub long_description: Option<String>,
    pub image: Option<String>,
    pub identifier: Option<String>,
}

impl LnurlMetadata {
    /// Parses the metadata string of an LNURL-pay service, a JSON array of
    /// `[mime_type, content]` pairs.
    pub fn from_raw(raw: &str) -> Result<Self, String> {
        let entries: Vec<(String, String)> =
            serde_json::from_str(raw).map_err(|e| format!("invalid lnurl metadata: {e}"))?;
        let find = |mime: &str| {
            entries
                .iter()
                .find(|(m, _)| m.starts_with(mime))
                .map(|(_, content)| content.clone())
        };
        Ok(LnurlMetadata {
            raw: raw.to_string(),
            plain_text: find("text/plain").ok_or("lnurl metadata without text/plain entry")?,
            long_description: find("text/long-desc"),
            image: find("image/"),
            identifier: find("text/identifier").or_else(|| find("text/email")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LnurlSuccessAction {
    Message {
        message: String,
    },
    Url {
        description: String,
        url: String,
    },
    Aes {
        description: String,
        ciphertext: String,
        iv: String,
    },
}
