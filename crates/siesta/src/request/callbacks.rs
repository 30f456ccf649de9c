//! Per-caller callback storage.
//!
//! Each slot fires at most once. Callbacks are taken out of the slots before
//! they run so that a callback may register further callbacks on the same
//! request without deadlocking.

use super::ResponseInfo;
use crate::entity::Entity;
use crate::error::RequestError;

pub(crate) type CompletionCallback = Box<dyn FnOnce(&ResponseInfo) + Send>;
pub(crate) type EntityCallback = Box<dyn FnOnce(&Entity) + Send>;
pub(crate) type FailureCallback = Box<dyn FnOnce(&RequestError) + Send>;
pub(crate) type NotModifiedCallback = Box<dyn FnOnce() + Send>;
pub(crate) type ProgressCallback = Box<dyn FnMut(f64) + Send>;

#[derive(Default)]
pub(crate) struct CallbackSlots {
    completion: Vec<CompletionCallback>,
    success: Vec<EntityCallback>,
    failure: Vec<FailureCallback>,
    new_data: Vec<EntityCallback>,
    not_modified: Vec<NotModifiedCallback>,
    progress: Vec<ProgressCallback>,
    outcome: Option<ResponseInfo>,
}

impl CallbackSlots {
    pub(crate) fn outcome(&self) -> Option<&ResponseInfo> {
        self.outcome.as_ref()
    }

    pub(crate) fn add_completion(&mut self, callback: CompletionCallback) {
        self.completion.push(callback);
    }

    pub(crate) fn add_success(&mut self, callback: EntityCallback) {
        self.success.push(callback);
    }

    pub(crate) fn add_failure(&mut self, callback: FailureCallback) {
        self.failure.push(callback);
    }

    pub(crate) fn add_new_data(&mut self, callback: EntityCallback) {
        self.new_data.push(callback);
    }

    pub(crate) fn add_not_modified(&mut self, callback: NotModifiedCallback) {
        self.not_modified.push(callback);
    }

    pub(crate) fn add_progress(&mut self, callback: ProgressCallback) {
        self.progress.push(callback);
    }

    pub(crate) fn take_progress(&mut self) -> Vec<ProgressCallback> {
        std::mem::take(&mut self.progress)
    }

    /// Puts progress callbacks back after a report, keeping any that were
    /// registered while they were out.
    pub(crate) fn restore_progress(&mut self, mut callbacks: Vec<ProgressCallback>) {
        if self.outcome.is_some() {
            return;
        }
        callbacks.append(&mut self.progress);
        self.progress = callbacks;
    }

    /// Records the outcome and hands back every pending callback.
    ///
    /// # Panics
    ///
    /// Panics if the slots have already fired.
    pub(crate) fn fire(&mut self, info: ResponseInfo) -> FiredCallbacks {
        assert!(
            self.outcome.is_none(),
            "request callbacks fired more than once"
        );
        self.outcome = Some(info.clone());
        FiredCallbacks {
            info,
            completion: std::mem::take(&mut self.completion),
            success: std::mem::take(&mut self.success),
            failure: std::mem::take(&mut self.failure),
            new_data: std::mem::take(&mut self.new_data),
            not_modified: std::mem::take(&mut self.not_modified),
            progress: std::mem::take(&mut self.progress),
        }
    }
}

pub(crate) struct FiredCallbacks {
    info: ResponseInfo,
    completion: Vec<CompletionCallback>,
    success: Vec<EntityCallback>,
    failure: Vec<FailureCallback>,
    new_data: Vec<EntityCallback>,
    not_modified: Vec<NotModifiedCallback>,
    progress: Vec<ProgressCallback>,
}

impl FiredCallbacks {
    /// Runs callbacks in delivery order: final progress, completion, then the
    /// success or failure family.
    pub(crate) fn run(self) {
        for mut callback in self.progress {
            callback(1.0);
        }
        for callback in self.completion {
            callback(&self.info);
        }
        match &self.info.response {
            Ok(entity) => {
                for callback in self.success {
                    callback(entity);
                }
                if self.info.is_new {
                    for callback in self.new_data {
                        callback(entity);
                    }
                } else {
                    for callback in self.not_modified {
                        callback();
                    }
                }
            }
            Err(error) => {
                for callback in self.failure {
                    callback(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::entity::Content;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |s: &str| sink.lock().push(s.to_owned()))
    }

    #[test]
    fn test_success_order() {
        let (log, record) = recorder();
        let mut slots = CallbackSlots::default();

        let r = record.clone();
        slots.add_not_modified(Box::new(move || r("not_modified")));
        let r = record.clone();
        slots.add_new_data(Box::new(move |_| r("new_data")));
        let r = record.clone();
        slots.add_failure(Box::new(move |_| r("failure")));
        let r = record.clone();
        slots.add_success(Box::new(move |_| r("success")));
        let r = record.clone();
        slots.add_completion(Box::new(move |_| r("completion")));
        let r = record.clone();
        slots.add_progress(Box::new(move |p| r(&format!("progress {p}"))));

        let entity = Entity::new(Content::Text("x".into()), "text/plain");
        slots.fire(ResponseInfo::new(Ok(entity))).run();

        assert_eq!(
            *log.lock(),
            vec!["progress 1", "completion", "success", "new_data"]
        );
    }

    #[test]
    fn test_failure_order() {
        let (log, record) = recorder();
        let mut slots = CallbackSlots::default();

        let r = record.clone();
        slots.add_success(Box::new(move |_| r("success")));
        let r = record.clone();
        slots.add_failure(Box::new(move |_| r("failure")));
        let r = record.clone();
        slots.add_completion(Box::new(move |_| r("completion")));

        slots
            .fire(ResponseInfo::new(Err(RequestError::new("boom"))))
            .run();
        assert_eq!(*log.lock(), vec!["completion", "failure"]);
    }

    #[test]
    #[should_panic(expected = "fired more than once")]
    fn test_firing_twice_panics() {
        let mut slots = CallbackSlots::default();
        let info = ResponseInfo::new(Err(RequestError::new("boom")));
        slots.fire(info.clone()).run();
        let _ = slots.fire(info);
    }
}
