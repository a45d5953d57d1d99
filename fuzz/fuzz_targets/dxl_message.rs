#![no_main]

use dxl_broker_core::dxl::message::DxlMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic, and a successful parse must round-trip
    // through serialize()/parse() without changing the decoded fields.
    if let Ok(msg) = DxlMessage::parse(data) {
        let reencoded = msg.serialize().expect("serializing a parsed message must not fail");
        let reparsed = DxlMessage::parse(&reencoded).expect("reparsing our own serialization must not fail");
        assert_eq!(msg.message_id, reparsed.message_id);
        assert_eq!(msg.message_type, reparsed.message_type);
    }
});
