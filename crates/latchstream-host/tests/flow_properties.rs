// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use latchstream_host::latches_in_transit;
use latchstream_host::resend::ResendWindow;
use latchstream_protocol::encode_latch_data;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_in_transit_across_wrap(device_pos in any::<u16>(), sent in 0u16..=u16::MAX) {
        let host_pos = device_pos.wrapping_add(sent);
        prop_assert_eq!(latches_in_transit(host_pos, device_pos), usize::from(sent));
    }

    #[test]
    fn test_resend_window_keeps_newest(
        batches in prop::collection::vec(1usize..40, 1..60),
        capacity in 40usize..200,
        rewind_fraction in 0.0f64..=1.0,
    ) {
        let mut window = ResendWindow::new(1);
        let mut next = 0u16;
        let mut all = Vec::new();
        for size in batches {
            let words: Vec<u16> = (next..next + size as u16).collect();
            next += size as u16;
            all.extend_from_slice(&words);
            window.push(encode_latch_data(&words));
            window.prune(capacity);
            prop_assert!(window.len() <= capacity);
        }

        let rewind = (window.len() as f64 * rewind_fraction) as usize;
        let reclaimed = window.reclaim(rewind).unwrap();
        prop_assert_eq!(&reclaimed[..], &all[all.len() - rewind..]);
    }
}
