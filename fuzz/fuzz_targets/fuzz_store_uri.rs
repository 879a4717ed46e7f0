#![no_main]

use libfuzzer_sys::fuzz_target;
use store_lifecycle::uri::redact_credentials;
use store_lifecycle::StoreUri;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = redact_credentials(text);

    if let Ok(uri) = StoreUri::parse(text) {
        let redacted = uri.redacted();
        if uri.has_password() {
            assert!(redacted.contains("***"));
        }
        let _ = uri.tls_requested();
        let _ = uri.database();
    }
});
