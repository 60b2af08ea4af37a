use std::{ops, sync::Arc};

use tokio::sync::watch;

use crate::UserProfile;

type Slot = Option<Arc<UserProfile>>;

/// A watcher that can be used to observe the signed-in user
///
/// This is the host's view of the user-state slot. A value of `None` means
/// no user is signed in.
#[derive(Clone, Debug)]
pub struct UserWatcher {
    watcher: watch::Receiver<Slot>,
}

/// An outstanding borrow of the user-state slot
///
/// This borrow should be held for as brief a time as possible, as outstanding
/// borrows will block publication of a new profile.
#[derive(Debug)]
pub struct BorrowedUser<'a> {
    inner: watch::Ref<'a, Slot>,
}

impl<'a> ops::Deref for BorrowedUser<'a> {
    type Target = Option<Arc<UserProfile>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The user publisher has gone away and no new profiles will be published
#[derive(Debug, thiserror::Error)]
#[error("the user publisher has quit")]
pub struct UserPublisherQuit(#[from] watch::error::RecvError);

impl UserWatcher {
    /// Borrows the current user
    ///
    /// The borrow blocks the scheme from publishing. Do not call into the
    /// scheme while holding it.
    pub fn user(&self) -> BorrowedUser<'_> {
        BorrowedUser {
            inner: self.watcher.borrow(),
        }
    }

    /// Gets a shared handle to the current user, if any
    pub fn current(&self) -> Option<Arc<UserProfile>> {
        self.watcher.borrow().clone()
    }

    /// Whether a user is currently signed in
    pub fn is_signed_in(&self) -> bool {
        self.watcher.borrow().is_some()
    }

    /// A future that returns as ready whenever the user slot is updated
    ///
    /// If the publisher is ever dropped, then this function will return an error
    /// indicating that no new profiles will be published.
    pub async fn changed(&mut self) -> Result<(), UserPublisherQuit> {
        Ok(self.watcher.changed().await?)
    }
}

/// The publishing side of the user-state slot
#[derive(Debug)]
pub(crate) struct UserPublisher {
    tx: watch::Sender<Slot>,
}

impl UserPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub(crate) fn watcher(&self) -> UserWatcher {
        UserWatcher {
            watcher: self.tx.subscribe(),
        }
    }

    /// Publishes a profile, or `None` to sign the user out
    pub(crate) fn set_user(&self, user: Option<UserProfile>) {
        self.tx.send_replace(user.map(Arc::new));
    }

    pub(crate) fn has_user(&self) -> bool {
        self.tx.borrow().is_some()
    }
}
