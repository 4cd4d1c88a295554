use tokio::sync::oneshot;

/// Fires at most once, when a watched list changes. Must be re-established
/// by calling the corresponding `watch_*` method again after it fires.
///
/// A dropped sender (e.g. the task driving an etcd watch stream died because
/// the session flapped) resolves `changed()` just like an actual event: the
/// coordination client must surface session loss as a change on every
/// outstanding watch.
pub struct ChangeSignal(oneshot::Receiver<()>);

impl ChangeSignal {
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self(rx)
    }

    pub async fn changed(self) {
        let _ = self.0.await;
    }
}
