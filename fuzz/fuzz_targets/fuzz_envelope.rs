#![no_main]

use arbitrary::Arbitrary;
use docseal::secure_channel::Envelope;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct EnvelopeFuzzInput {
    raw: String,
    json: Vec<u8>,
    max_bytes: u16,
}

fuzz_target!(|input: EnvelopeFuzzInput| {
    // Arbitrary transport strings
    let _ = Envelope::decode(&input.raw, usize::from(input.max_bytes));

    // Arbitrary JSON behind valid base64
    let encoded = base64::encode(&input.json);
    if let Ok(envelope) = Envelope::decode(&encoded, 1 << 20) {
        let _ = envelope.sent_at();
        if let Ok(reencoded) = envelope.encode() {
            assert!(Envelope::decode(&reencoded, 1 << 20).is_ok());
        }
    }
});
