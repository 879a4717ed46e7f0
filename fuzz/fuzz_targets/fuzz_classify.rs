#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::Duration;
use store_lifecycle::{ErrorClassifier, ErrorKind, SequenceJitter};

#[derive(Debug)]
struct ClassifyInput {
    message: String,
    attempt: u32,
    base_ms: u32,
    jitter: f64,
}

impl<'a> Arbitrary<'a> for ClassifyInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            message: u.arbitrary()?,
            attempt: u.arbitrary()?,
            base_ms: u.arbitrary()?,
            jitter: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ClassifyInput| {
    let classifier = ErrorClassifier::new(Arc::new(SequenceJitter::new(vec![input.jitter])));

    let err = classifier.classify_message(&input.message);
    if classifier.is_recoverable_message(&input.message) {
        assert_ne!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    let max = Duration::from_secs(30);
    let delay = classifier.compute_backoff(
        input.attempt,
        Duration::from_millis(u64::from(input.base_ms)),
        max,
    );
    assert!(delay <= max);
});
