#![forbid(unsafe_code)]

//! Pure-function memoizers of fixed arity.
//!
//! `PureProxyN` wraps an N-argument function, keeps the last arguments and
//! result, and skips the call while every argument is loosely identical to
//! its stored counterpart. The wrapped function must be pure; this is not
//! checked.
//!
//! ```
//! use viewcore_detect::memo::PureProxy2;
//!
//! let mut calls = 0;
//! let mut full_name = PureProxy2::new(|first: &String, last: &String| {
//!     calls += 1;
//!     format!("{first} {last}")
//! });
//! assert_eq!(full_name.call("Ada".into(), "Lovelace".into()), "Ada Lovelace");
//! assert_eq!(full_name.call("Ada".into(), "Lovelace".into()), "Ada Lovelace");
//! drop(full_name);
//! assert_eq!(calls, 1);
//! ```

use std::rc::Rc;

use crate::value::{self, Value};

/// Identity used to decide whether a memoized argument changed.
pub trait LooseIdentical {
    /// Whether `self` and `other` count as the same argument.
    fn loose_identical(&self, other: &Self) -> bool;
}

impl LooseIdentical for Value {
    fn loose_identical(&self, other: &Self) -> bool {
        value::loose_identical(self, other)
    }
}

impl LooseIdentical for f64 {
    fn loose_identical(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl LooseIdentical for f32 {
    fn loose_identical(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

macro_rules! loose_identical_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LooseIdentical for $ty {
                #[inline]
                fn loose_identical(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

loose_identical_by_eq!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String, &str,
    Rc<str>,
);

impl<T> LooseIdentical for Rc<T> {
    fn loose_identical(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: LooseIdentical> LooseIdentical for Option<T> {
    fn loose_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.loose_identical(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! pure_proxy {
    ($(#[$meta:meta])* $name:ident; $($idx:tt $arg:ident: $ty:ident),+) => {
        $(#[$meta])*
        pub struct $name<$($ty,)+ R, F> {
            func: F,
            last: Option<(($($ty,)+), R)>,
        }

        impl<$($ty,)+ R, F> $name<$($ty,)+ R, F>
        where
            $($ty: LooseIdentical,)+
            R: Clone,
            F: FnMut($(&$ty),+) -> R,
        {
            /// Wrap `func`; nothing is cached yet.
            pub fn new(func: F) -> Self {
                Self { func, last: None }
            }

            /// Result of `func` for these arguments, reusing the cached
            /// result when every argument is unchanged.
            pub fn call(&mut self, $($arg: $ty),+) -> R {
                if let Some((args, result)) = &self.last {
                    if $(args.$idx.loose_identical(&$arg))&&+ {
                        return result.clone();
                    }
                }
                let result = (self.func)($(&$arg),+);
                self.last = Some((($($arg,)+), result.clone()));
                result
            }

            /// Whether a result is cached.
            #[must_use]
            pub fn is_cached(&self) -> bool {
                self.last.is_some()
            }

            /// Forget the cached arguments and result.
            pub fn invalidate(&mut self) {
                self.last = None;
            }
        }

        impl<$($ty,)+ R, F> core::fmt::Debug for $name<$($ty,)+ R, F> {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("cached", &self.last.is_some())
                    .finish_non_exhaustive()
            }
        }
    };
}

pure_proxy!(
    /// Memoizer for one-argument functions.
    PureProxy1; 0 a0: A0
);
pure_proxy!(
    /// Memoizer for two-argument functions.
    PureProxy2; 0 a0: A0, 1 a1: A1
);
pure_proxy!(
    /// Memoizer for three-argument functions.
    PureProxy3; 0 a0: A0, 1 a1: A1, 2 a2: A2
);
pure_proxy!(
    /// Memoizer for four-argument functions.
    PureProxy4; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3
);
pure_proxy!(
    /// Memoizer for five-argument functions.
    PureProxy5; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4
);
pure_proxy!(
    /// Memoizer for six-argument functions.
    PureProxy6; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4, 5 a5: A5
);
pure_proxy!(
    /// Memoizer for seven-argument functions.
    PureProxy7; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4, 5 a5: A5, 6 a6: A6
);
pure_proxy!(
    /// Memoizer for eight-argument functions.
    PureProxy8; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4, 5 a5: A5, 6 a6: A6,
    7 a7: A7
);
pure_proxy!(
    /// Memoizer for nine-argument functions.
    PureProxy9; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4, 5 a5: A5, 6 a6: A6,
    7 a7: A7, 8 a8: A8
);
pure_proxy!(
    /// Memoizer for ten-argument functions.
    PureProxy10; 0 a0: A0, 1 a1: A1, 2 a2: A2, 3 a3: A3, 4 a4: A4, 5 a5: A5, 6 a6: A6,
    7 a7: A7, 8 a8: A8, 9 a9: A9
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn skips_call_for_identical_arguments() {
        let calls = Cell::new(0);
        let mut double = PureProxy1::new(|x: &f64| {
            calls.set(calls.get() + 1);
            x * 2.0
        });
        assert_eq!(double.call(2.0), 4.0);
        assert_eq!(double.call(2.0), 4.0);
        assert_eq!(calls.get(), 1);
        assert_eq!(double.call(3.0), 6.0);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn nan_arguments_are_unchanged() {
        let calls = Cell::new(0);
        let mut proxy = PureProxy1::new(|x: &f64| {
            calls.set(calls.get() + 1);
            x.is_nan()
        });
        assert!(proxy.call(f64::NAN));
        assert!(proxy.call(f64::NAN));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn any_changed_argument_reinvokes() {
        let calls = Cell::new(0);
        let mut sum = PureProxy3::new(|a: &i32, b: &i32, c: &i32| {
            calls.set(calls.get() + 1);
            a + b + c
        });
        assert_eq!(sum.call(1, 2, 3), 6);
        assert_eq!(sum.call(1, 2, 4), 7);
        assert_eq!(sum.call(1, 2, 4), 7);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn shared_values_compare_by_pointer() {
        let calls = Cell::new(0);
        let mut len = PureProxy1::new(|v: &Value| {
            calls.set(calls.get() + 1);
            v.as_list().map_or(0, |l| l.borrow().len())
        });
        let list = Value::list([Value::from(1)]);
        assert_eq!(len.call(list.clone()), 1);
        // In-place mutation keeps the identity, so the cached result comes back.
        list.as_list().unwrap().borrow_mut().push(Value::from(2));
        assert_eq!(len.call(list.clone()), 1);
        assert_eq!(len.call(Value::list([])), 0);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn ten_arguments() {
        let mut proxy = PureProxy10::new(
            |a: &u8, b: &u8, c: &u8, d: &u8, e: &u8, f: &u8, g: &u8, h: &u8, i: &u8, j: &u8| {
                [a, b, c, d, e, f, g, h, i, j].iter().map(|x| u32::from(**x)).sum::<u32>()
            },
        );
        assert_eq!(proxy.call(1, 1, 1, 1, 1, 1, 1, 1, 1, 1), 10);
        assert!(proxy.is_cached());
        proxy.invalidate();
        assert!(!proxy.is_cached());
    }

    #[test]
    fn options_and_rcs() {
        let shared = Rc::new(5);
        assert!(Some(Rc::clone(&shared)).loose_identical(&Some(Rc::clone(&shared))));
        assert!(!Some(shared).loose_identical(&Some(Rc::new(5))));
        assert!(None::<f64>.loose_identical(&None));
    }
}
