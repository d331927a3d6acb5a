//! # Privilege Drop
//!
//! Thread-mode privilege as a one-way type-state. A context starts with a
//! [`Privileged`] token; [`Privileged::drop_privilege`] consumes it, sets
//! `CONTROL.nPRIV`, and hands back an [`Unprivileged`] token that has no
//! way back. Re-elevating would need an SVC gateway, which this system
//! does not provide.
//!
//! ```text
//!   ┌────────────┐  drop_privilege()  ┌──────────────┐
//!   │ Privileged │ ─────────────────► │ Unprivileged │
//!   └────────────┘                    └──────────────┘
//! ```

use cortex_m::register::control::{self, Npriv};

/// Privilege level of the current thread-mode context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Privileged,
    Unprivileged,
}

/// Writes the thread-mode privilege bit.
pub trait PrivilegeControl {
    fn level(&self) -> PrivilegeLevel;
    /// Set `CONTROL.nPRIV` and synchronize the instruction stream.
    fn set_unprivileged(&mut self);
}

/// The core's CONTROL register.
#[derive(Debug)]
pub struct CoreControl;

impl PrivilegeControl for CoreControl {
    fn level(&self) -> PrivilegeLevel {
        if control::read().npriv().is_privileged() {
            PrivilegeLevel::Privileged
        } else {
            PrivilegeLevel::Unprivileged
        }
    }

    fn set_unprivileged(&mut self) {
        let mut ctrl = control::read();
        ctrl.set_npriv(Npriv::Unprivileged);
        // Safety: dropping privilege cannot break memory safety; at worst
        // later privileged-only accesses fault.
        unsafe { control::write(ctrl) };
        cortex_m::asm::isb();
    }
}

/// Proof that the current context still runs privileged.
#[derive(Debug)]
pub struct Privileged<C: PrivilegeControl> {
    control: C,
}

/// Proof that the current context has dropped privilege for good.
#[derive(Debug)]
pub struct Unprivileged<C: PrivilegeControl> {
    control: C,
}

impl Privileged<CoreControl> {
    /// Claim the privileged token for the running context.
    ///
    /// Returns `None` if thread mode already runs unprivileged.
    pub fn current() -> Option<Self> {
        Privileged::claim(CoreControl)
    }
}

impl<C: PrivilegeControl> Privileged<C> {
    pub fn claim(control: C) -> Option<Self> {
        match control.level() {
            PrivilegeLevel::Privileged => Some(Self { control }),
            PrivilegeLevel::Unprivileged => None,
        }
    }

    /// Irreversibly drop to unprivileged thread mode.
    pub fn drop_privilege(mut self) -> Unprivileged<C> {
        self.control.set_unprivileged();
        Unprivileged { control: self.control }
    }
}

impl<C: PrivilegeControl> Unprivileged<C> {
    pub fn level(&self) -> PrivilegeLevel {
        self.control.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeControl {
        npriv: bool,
        writes: u32,
    }

    impl PrivilegeControl for &mut FakeControl {
        fn level(&self) -> PrivilegeLevel {
            if self.npriv {
                PrivilegeLevel::Unprivileged
            } else {
                PrivilegeLevel::Privileged
            }
        }

        fn set_unprivileged(&mut self) {
            self.npriv = true;
            self.writes += 1;
        }
    }

    #[test]
    fn test_drop_is_one_way() {
        let mut ctrl = FakeControl { npriv: false, writes: 0 };
        let token = Privileged::claim(&mut ctrl).unwrap();
        let dropped = token.drop_privilege();
        assert_eq!(dropped.level(), PrivilegeLevel::Unprivileged);
        drop(dropped);

        assert!(ctrl.npriv);
        assert_eq!(ctrl.writes, 1);
    }

    #[test]
    fn test_cannot_claim_once_unprivileged() {
        let mut ctrl = FakeControl { npriv: true, writes: 0 };
        assert!(Privileged::claim(&mut ctrl).is_none());
        assert_eq!(ctrl.writes, 0);
    }
}
