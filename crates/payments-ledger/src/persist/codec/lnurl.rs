use serde::{Deserialize, Serialize};

use super::{CodecError, from_blob, to_blob};
use crate::models::{LnurlMetadata, LnurlPay, LnurlSuccessAction, MilliSatoshi};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum LnurlBaseTypeVersion {
    #[strum(serialize = "PAY_V0")]
    PayV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum LnurlMetadataTypeVersion {
    #[strum(serialize = "PAY_V0")]
    PayV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum LnurlSuccessActionTypeVersion {
    #[strum(serialize = "MESSAGE_V0")]
    MessageV0,
    #[strum(serialize = "URL_V0")]
    UrlV0,
    #[strum(serialize = "AES_V0")]
    AesV0,
}

mod v0 {
    use super::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    pub(super) struct Pay {
        pub initial_url: String,
        pub callback: String,
        pub min_sendable_msat: u64,
        pub max_sendable_msat: u64,
        pub max_comment_length: Option<u64>,
    }

    /// Only the raw string is stored, the parsed fields are derived from it.
    #[derive(Serialize, Deserialize)]
    pub(super) struct Metadata {
        pub raw: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Message {
        pub message: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Url {
        pub description: String,
        pub url: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Aes {
        pub description: String,
        pub ciphertext: String,
        pub iv: String,
    }
}

pub(crate) fn encode_base(pay: &LnurlPay) -> Result<(LnurlBaseTypeVersion, Vec<u8>), CodecError> {
    Ok((
        LnurlBaseTypeVersion::PayV0,
        to_blob(&v0::Pay {
            initial_url: pay.initial_url.clone(),
            callback: pay.callback.clone(),
            min_sendable_msat: pay.min_sendable.0,
            max_sendable_msat: pay.max_sendable.0,
            max_comment_length: pay.max_comment_length,
        })?,
    ))
}

pub(crate) fn decode_base(
    type_version: LnurlBaseTypeVersion,
    blob: &[u8],
) -> Result<LnurlPay, CodecError> {
    match type_version {
        LnurlBaseTypeVersion::PayV0 => {
            let pay: v0::Pay = from_blob(blob)?;
            Ok(LnurlPay {
                initial_url: pay.initial_url,
                callback: pay.callback,
                min_sendable: MilliSatoshi(pay.min_sendable_msat),
                max_sendable: MilliSatoshi(pay.max_sendable_msat),
                max_comment_length: pay.max_comment_length,
            })
        }
    }
}

pub(crate) fn encode_metadata(
    metadata: &LnurlMetadata,
) -> Result<(LnurlMetadataTypeVersion, Vec<u8>), CodecError> {
    Ok((
        LnurlMetadataTypeVersion::PayV0,
        to_blob(&v0::Metadata {
            raw: metadata.raw.clone(),
        })?,
    ))
}

pub(crate) fn decode_metadata(
    type_version: LnurlMetadataTypeVersion,
    blob: &[u8],
) -> Result<LnurlMetadata, CodecError> {
    match type_version {
        LnurlMetadataTypeVersion::PayV0 => {
            let v0::Metadata { raw } = from_blob(blob)?;
            LnurlMetadata::from_raw(&raw).map_err(CodecError::InvalidValue)
        }
    }
}

pub(crate) fn encode_success_action(
    action: &LnurlSuccessAction,
) -> Result<(LnurlSuccessActionTypeVersion, Vec<u8>), CodecError> {
    Ok(match action {
        LnurlSuccessAction::Message { message } => (
            LnurlSuccessActionTypeVersion::MessageV0,
            to_blob(&v0::Message {
                message: message.clone(),
            })?,
        ),
        LnurlSuccessAction::Url { description, url } => (
            LnurlSuccessActionTypeVersion::UrlV0,
            to_blob(&v0::Url {
                description: description.clone(),
                url: url.clone(),
            })?,
        ),
        LnurlSuccessAction::Aes {
            description,
            ciphertext,
            iv,
        } => (
            LnurlSuccessActionTypeVersion::AesV0,
            to_blob(&v0::Aes {
                description: description.clone(),
                ciphertext: ciphertext.clone(),
                iv: iv.clone(),
            })?,
        ),
    })
}

pub(crate) fn decode_success_action(
    type_version: LnurlSuccessActionTypeVersion,
    blob: &[u8],
) -> Result<LnurlSuccessAction, CodecError> {
    Ok(match type_version {
        LnurlSuccessActionTypeVersion::MessageV0 => {
            let v0::Message { message } = from_blob(blob)?;
            LnurlSuccessAction::Message { message }
        }
        LnurlSuccessActionTypeVersion::UrlV0 => {
            let v0::Url { description, url } = from_blob(blob)?;
            LnurlSuccessAction::Url { description, url }
        }
        LnurlSuccessActionTypeVersion::AesV0 => {
            let v0::Aes {
                description,
                ciphertext,
                iv,
            } = from_blob(blob)?;
            LnurlSuccessAction::Aes {
                description,
                ciphertext,
                iv,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_base_round_trip() {
        let pay = LnurlPay {
            initial_url: "lnurl1dp68gurn8ghj7".to_string(),
            callback: "https://service.com/lnurlp/callback".to_string(),
            min_sendable: MilliSatoshi(1_000),
            max_sendable: MilliSatoshi(100_000_000),
            max_comment_length: Some(140),
        };
        let (type_version, blob) = encode_base(&pay).unwrap();
        assert_eq!(decode_base(type_version, &blob).unwrap(), pay);
    }

    #[test]
    fn test_metadata_round_trip() {
        let metadata = LnurlMetadata::from_raw(concat!(
            r#"[["text/plain","Coffee"],["text/long-desc","One espresso"],"#,
            r#"["text/identifier","bob@service.com"]]"#,
        ))
        .unwrap();
        assert_eq!(metadata.plain_text, "Coffee");
        assert_eq!(metadata.long_description.as_deref(), Some("One espresso"));
        assert_eq!(metadata.identifier.as_deref(), Some("bob@service.com"));
        assert_eq!(metadata.image, None);

        let (type_version, blob) = encode_metadata(&metadata).unwrap();
        assert_eq!(decode_metadata(type_version, &blob).unwrap(), metadata);
    }

    #[test]
    fn test_metadata_without_plain_text_is_rejected() {
        let blob = br#"{"raw":"[[\"image/png;base64\",\"iVBOR\"]]"}"#;
        assert!(decode_metadata(LnurlMetadataTypeVersion::PayV0, blob).is_err());
    }

    #[rstest]
    #[case(LnurlSuccessAction::Message { message: "thanks".to_string() })]
    #[case(LnurlSuccessAction::Url {
        description: "your order".to_string(),
        url: "https://service.com/order/1".to_string(),
    })]
    #[case(LnurlSuccessAction::Aes {
        description: "voucher".to_string(),
        ciphertext: "c2VjcmV0".to_string(),
        iv: "aXYxMjM0NTY3ODkwMTIzNA==".to_string(),
    })]
    fn test_success_action_round_trip(#[case] action: LnurlSuccessAction) {
        let (type_version, blob) = encode_success_action(&action).unwrap();
        assert_eq!(decode_success_action(type_version, &blob).unwrap(), action);
    }
}
