use tokio::sync::watch;

/// Gate closed while the global rate limit is in effect.
///
/// Every request waits on the gate before it is dispatched. The gate counts
/// closures, so overlapping global 429s keep it closed until the last one has
/// elapsed.
#[derive(Debug)]
pub(crate) struct GlobalGate {
    closures: watch::Sender<usize>,
}

impl GlobalGate {
    pub(crate) fn new() -> Self {
        let (closures, _) = watch::channel(0);
        Self { closures }
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.closures.borrow() == 0
    }

    /// Wait until no closure is active.
    ///
    /// Returns immediately while the gate is open.
    pub(crate) async fn wait_open(&self) {
        let mut closures = self.closures.subscribe();
        // The sender lives as long as the gate, so this cannot fail
        let _ = closures.wait_for(|count| *count == 0).await;
    }

    /// Close the gate until the returned guard is dropped
    pub(crate) fn close(&self) -> GateClosure<'_> {
        self.closures.send_modify(|count| *count += 1);
        GateClosure { gate: self }
    }
}

/// An active closure of the [`GlobalGate`]
#[derive(Debug)]
pub(crate) struct GateClosure<'a> {
    gate: &'a GlobalGate,
}

impl Drop for GateClosure<'_> {
    fn drop(&mut self) {
        self.gate
            .closures
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}
