//! Property-based coverage of cross-cutting invariants (queue FIFO order,
//! semaphore counting, event mask/auto-clear behavior), generative in the
//! same spirit as a randomized-iteration property suite, expressed as
//! `proptest` strategies instead of a fixed iteration count over
//! hand-rolled random generators.

use proptest::prelude::*;

use osal::{event, queue, semaphore};

proptest! {
    /// Queue round-trip preserves FIFO order, and
    /// `get_count + get_available_space == capacity` holds after every send.
    #[test]
    fn queue_fifo_round_trip(capacity in 1usize..32, items in prop::collection::vec(any::<u8>(), 0..32)) {
        let items: Vec<u8> = items.into_iter().take(capacity).collect();
        let q = queue::create(1, capacity).unwrap();
        for &b in &items {
            queue::send(q, &[b], abi::NO_WAIT).unwrap();
            prop_assert_eq!(
                queue::get_count(q).unwrap() + queue::get_available_space(q).unwrap(),
                capacity
            );
        }
        for &expected in &items {
            let mut buf = [0u8; 1];
            queue::receive(q, &mut buf, abi::NO_WAIT).unwrap();
            prop_assert_eq!(buf[0], expected);
        }
        prop_assert!(queue::is_empty(q).unwrap());
        queue::delete(q).unwrap();
    }

    /// With `initial = C, max = M`, C consecutive NO_WAIT takes succeed and
    /// the next one times out; N gives then N takes all succeed when C = 0
    /// and M >= N.
    #[test]
    fn semaphore_counting_holds(max in 1u32..64, initial in 0u32..64) {
        prop_assume!(initial <= max);
        let s = semaphore::create(initial, max).unwrap();
        for _ in 0..initial {
            semaphore::take(s, abi::NO_WAIT).unwrap();
        }
        prop_assert_eq!(semaphore::take(s, abi::NO_WAIT), Err(abi::Status::Timeout));
        semaphore::delete(s).unwrap();
    }

    #[test]
    fn semaphore_give_then_take_balance(max in 1u32..64) {
        let s = semaphore::create(0, max).unwrap();
        for _ in 0..max {
            semaphore::give(s).unwrap();
        }
        for _ in 0..max {
            semaphore::take(s, abi::NO_WAIT).unwrap();
        }
        prop_assert_eq!(semaphore::take(s, abi::NO_WAIT), Err(abi::Status::Timeout));
        semaphore::delete(s).unwrap();
    }

    /// Bits outside the 24-bit mask are always dropped, regardless of
    /// which bits are requested.
    #[test]
    fn event_bits_outside_mask_are_dropped(mask in any::<u32>()) {
        prop_assume!(mask != 0);
        let e = event::create().unwrap();
        event::set(e, mask).unwrap();
        prop_assert_eq!(event::get(e) & !abi::EVENT_MASK, 0);
        event::delete(e).unwrap();
    }

    /// Auto-clear leaves exactly the matched bits cleared, for any mask
    /// drawn from the 24-bit space.
    #[test]
    fn event_auto_clear_clears_exactly_matched(set_mask in 0u32..(1 << 24), wait_mask in 0u32..(1 << 24)) {
        prop_assume!(wait_mask != 0);
        let e = event::create().unwrap();
        event::set(e, set_mask).unwrap();
        match event::wait(e, wait_mask, abi::EventWaitMode::Any, true, abi::NO_WAIT) {
            Ok(matched) => {
                prop_assert_eq!(matched, set_mask & wait_mask);
                prop_assert_eq!(event::get(e) & matched, 0);
            }
            Err(abi::Status::Timeout) => {
                prop_assert_eq!(set_mask & wait_mask, 0);
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
        event::delete(e).unwrap();
    }
}
