//! Deferred teardown.
//!
//! Finalizing a payload usually drops handles to further payloads, whose
//! finalizers drop more handles, and so on down a linked structure. Doing
//! that with nested drops costs one stack frame group per link. A finalizer
//! instead hands what it took out of its payload to [`retire`]: the first
//! call on a thread drops it and then drains everything retired meanwhile,
//! so a chain of any length is torn down from a flat loop.

use std::any::Any;
use std::cell::RefCell;

thread_local! {
    // `Some` while a drain is running on this thread.
    static RETIRED: RefCell<Option<Vec<Box<dyn Any>>>> = const { RefCell::new(None) };
}

/// Resets the drain state even if a drop panics.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let left = RETIRED.with(|retired| retired.borrow_mut().take());
        drop(left);
    }
}

/// Drop `value`, flattening any teardown it triggers on this thread.
///
/// When called from inside another `retire` on the same thread the value is
/// queued and dropped by the outermost call before it returns.
pub fn retire<T: 'static>(value: T) {
    let value = RETIRED.with(|retired| {
        let mut retired = retired.borrow_mut();
        match retired.as_mut() {
            Some(queue) => {
                queue.push(Box::new(value) as Box<dyn Any>);
                None
            }
            None => {
                *retired = Some(Vec::new());
                Some(value)
            }
        }
    });
    let Some(value) = value else {
        return;
    };

    let _draining = Draining;
    drop(value);
    while let Some(next) = RETIRED.with(|retired| retired.borrow_mut().as_mut().and_then(Vec::pop)) {
        drop(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    /// Retires its successor when dropped.
    struct Link {
        next: Option<Box<Link>>,
        dropped: Rc<RefCell<Vec<usize>>>,
        id: usize,
    }

    impl Drop for Link {
        fn drop(&mut self) {
            self.dropped.borrow_mut().push(self.id);
            if let Some(next) = self.next.take() {
                retire(next);
            }
        }
    }

    fn chain(len: usize, dropped: &Rc<RefCell<Vec<usize>>>) -> Option<Box<Link>> {
        let mut head = None;
        for id in (0..len).rev() {
            head = Some(Box::new(Link {
                next: head,
                dropped: Rc::clone(dropped),
                id,
            }));
        }
        head
    }

    #[test]
    fn outermost_call_drains_everything() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        retire(chain(4, &dropped));
        assert_eq!(*dropped.borrow(), vec![0, 1, 2, 3]);
        assert!(RETIRED.with(|retired| retired.borrow().is_none()));
    }

    #[test]
    fn long_chains_do_not_recurse() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        retire(chain(200_000, &dropped));
        assert_eq!(dropped.borrow().len(), 200_000);
    }

    #[test]
    fn plain_values_are_dropped_immediately() {
        let value = Rc::new(());
        retire(Rc::clone(&value));
        assert_eq!(Rc::strong_count(&value), 1);
    }
}
