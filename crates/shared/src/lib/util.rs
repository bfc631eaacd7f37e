fn is_prefixed_hex(value: &str, digits: usize) -> bool {
    match value.strip_prefix("0x") {
        Some(rest) => rest.len() == digits && rest.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// 20-byte hex-prefixed account address.
pub fn is_hex_address(value: &str) -> bool {
    is_prefixed_hex(value, 40)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_shape() {
        assert!(is_hex_address("0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4be"));
        assert!(is_hex_address("0x742E62CC7A19EF7D9C44306C07FAD54B5BF6D4BE"));
        assert!(!is_hex_address("742e62cc7a19ef7d9c44306c07fad54b5bf6d4be"));
        assert!(!is_hex_address("0x742e62cc"));
        assert!(!is_hex_address("0x742e62cc7a19ef7d9c44306c07fad54b5bf6d4bg"));
    }
}
