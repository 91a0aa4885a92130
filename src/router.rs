//! Navigation between the panel's views.

use crate::{SessionStore, User};
use parking_lot::Mutex;
use std::fmt::{self, Display, Formatter};

/// The views the panel knows about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    StaffCards,
    Settings,
    /// A staff member's own card.
    MyCard,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/",
            Route::StaffCards => "/staff-cards",
            Route::Settings => "/settings",
            Route::MyCard => "/user/my-card",
        }
    }

    pub fn from_path(path: &str) -> Option<Route> {
        [
            Route::Login,
            Route::Dashboard,
            Route::StaffCards,
            Route::Settings,
            Route::MyCard,
        ]
        .iter()
        .copied()
        .find(|route| route.path() == path)
    }

    /// Does viewing this route require a logged in user?
    pub fn is_protected(self) -> bool { self != Route::Login }

    /// Where a user lands after logging in.
    pub fn home_for(user: &User) -> Route {
        if user.is_staff() {
            Route::MyCard
        } else {
            Route::Dashboard
        }
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// How a navigation affects the history stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Navigation {
    Push,
    /// Overwrite the current entry so "back" can't return to it.
    Replace,
}

/// Something which can move the user between views.
pub trait Router: Send + Sync {
    fn navigate(&self, to: Route, mode: Navigation);
}

/// A [`Router`] which just keeps track of the history stack.
#[derive(Debug)]
pub struct History {
    entries: Mutex<Vec<Route>>,
}

impl History {
    pub fn starting_at(route: Route) -> Self {
        History {
            entries: Mutex::new(vec![route]),
        }
    }

    pub fn current(&self) -> Route {
        self.entries
            .lock()
            .last()
            .copied()
            .unwrap_or(Route::Dashboard)
    }

    pub fn entries(&self) -> Vec<Route> { self.entries.lock().clone() }

    /// Go back one entry, returning the new current route.
    pub fn back(&self) -> Option<Route> {
        let mut entries = self.entries.lock();
        if entries.len() <= 1 {
            return None;
        }

        entries.pop();
        entries.last().copied()
    }
}

impl Default for History {
    fn default() -> Self { History::starting_at(Route::Dashboard) }
}

impl Router for History {
    fn navigate(&self, to: Route, mode: Navigation) {
        log::debug!("Navigating to {} ({:?})", to, mode);
        let mut entries = self.entries.lock();

        if mode == Navigation::Replace {
            entries.pop();
        }
        entries.push(to);
    }
}

/// What a view should do, given the current session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Gate {
    /// The session is still hydrating, render nothing.
    Loading,
    Render,
    RedirectTo(Route),
}

/// Decide whether `route` can be shown.
pub fn gate(route: Route, session: &SessionStore) -> Gate {
    if session.is_loading() {
        return Gate::Loading;
    }

    match session.user() {
        None if route.is_protected() => Gate::RedirectTo(Route::Login),
        Some(user) if route == Route::Login => {
            Gate::RedirectTo(Route::home_for(&user))
        },
        _ => Gate::Render,
    }
}
