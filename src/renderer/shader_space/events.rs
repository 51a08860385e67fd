//! Event read-back delivery.
//!
//! Event buffers hold `[fired_flag, payload...]` as `u32` words. The host only ever
//! reads them: a shader that never clears the flag fires its event every frame.

use tracing::trace;

use crate::renderer::registry::EventChannel;

pub(crate) fn decode_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<u32>)
        .collect()
}

/// Invoke the channel's callback if the read-back has its flag set.
pub(crate) fn deliver(channel: &mut EventChannel, bytes: &[u8]) -> bool {
    let words = decode_words(bytes);
    let Some((&flag, payload)) = words.split_first() else {
        return false;
    };
    if flag == 0 {
        return false;
    }
    let payload = &payload[..payload.len().min(channel.payload_words as usize)];
    trace!(target: "forge_bindings::events", event = %channel.name, ?payload, "event fired");
    (channel.callback)(payload);
    true
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::renderer::registry::{EventSpec, ResourceRegistry};

    fn bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn fires_only_with_flag_set() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut reg = ResourceRegistry::new();
        let id = reg
            .register_event(EventSpec::new("hit", 2, move |p: &[u32]| sink.borrow_mut().push(p.to_vec())))
            .unwrap();
        let channel = reg.event_mut(id);

        assert!(!deliver(channel, &bytes(&[0, 7, 9])));
        assert!(deliver(channel, &bytes(&[1, 7, 9])));
        assert!(deliver(channel, &bytes(&[5, 7, 9])));
        assert_eq!(*seen.borrow(), vec![vec![7, 9], vec![7, 9]]);
    }

    #[test]
    fn empty_read_back_does_not_fire() {
        let mut reg = ResourceRegistry::new();
        let id = reg
            .register_event(EventSpec::new("noop", 0, |_: &[u32]| panic!("must not fire")))
            .unwrap();
        assert!(!deliver(reg.event_mut(id), &[]));
    }
}
