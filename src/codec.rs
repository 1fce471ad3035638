use base64::{decode_config, encode_config, URL_SAFE, URL_SAFE_NO_PAD};

pub fn encode_b64url(bytes: &[u8]) -> String {
    encode_config(bytes, URL_SAFE_NO_PAD)
}

// Browsers hand out unpadded keys, but padded copies show up in stored data.
pub fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let value = value.trim();
    decode_config(value, URL_SAFE_NO_PAD).or_else(|_| decode_config(value, URL_SAFE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_has_no_padding() {
        let encoded = encode_b64url(&[0xfb, 0xff, 0x01, 0x02]);
        assert_eq!(encoded, "-_8BAg");
    }

    #[test]
    fn decode_accepts_padded_and_unpadded() {
        assert_eq!(decode_b64url("-_8BAg").unwrap(), vec![0xfb, 0xff, 0x01, 0x02]);
        assert_eq!(decode_b64url("-_8BAg==").unwrap(), vec![0xfb, 0xff, 0x01, 0x02]);
    }

    #[test]
    fn decode_rejects_standard_alphabet_and_garbage() {
        assert!(decode_b64url("+/8BAg").is_err());
        assert!(decode_b64url("not base64!").is_err());
    }
}
