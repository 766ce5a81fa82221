#![no_main]

use std::sync::Arc;
use std::time::Duration;

use airlink_session::session::{
    Delivery, FragmentMode, GenericSession, SessionConfig, SessionTransport,
};
use airlink_session::Result;
use libfuzzer_sys::fuzz_target;

struct Sink;

impl SessionTransport for Sink {
    fn mtu(&self) -> Result<usize> {
        Ok(20)
    }

    fn msg_tx(&self, _fragment: &[u8]) -> Result<()> {
        Ok(())
    }

    fn close(&self) {}

    fn keep_alive(&self, _period: Duration) {}
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let mode = match selector % 3 {
        0 => FragmentMode::Single,
        1 => FragmentMode::ShortFragment,
        _ => FragmentMode::OffsetHeader,
    };
    let config = SessionConfig::default();
    let mut session = GenericSession::new(0, &config);
    session.activate(Arc::new(Sink), mode).expect("fresh session activates");

    // Each fragment is prefixed with its length byte.
    let mut rest = rest;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        let (fragment, tail) = tail.split_at(len);
        rest = tail;
        if let Ok(Delivery::Complete(msg)) = session.receive(fragment) {
            assert!(msg.len() <= config.max_message_len);
        }
        assert!(session.defrag_offset() <= config.max_message_len);
    }
});
