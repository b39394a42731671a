/// Keeps the longest suffix of `events` whose total gas power fits into `max_block_gas`.
///
/// Events are walked from the newest. The first event that would push the running total
/// over the limit is dropped together with every event before it.
pub fn spill_events<E>(events: &[E], max_block_gas: u64, gas_power_used: impl Fn(&E) -> u64) -> &[E] {
    let mut total = 0u64;
    for (i, event) in events.iter().enumerate().rev() {
        total = total.saturating_add(gas_power_used(event));
        if total > max_block_gas {
            return &events[i + 1..];
        }
    }
    events
}
