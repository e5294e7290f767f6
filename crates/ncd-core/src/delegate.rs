#![forbid(unsafe_code)]

//! Type-erased, value-typed bound callables.
//!
//! A [`Delegate<A, R>`] binds one receiver and one function into a single
//! callable value. The receiver is captured as a `Weak` reference, so a
//! delegate never keeps its receiver alive; the standard pattern is for the
//! receiver to own the [`Connection`](crate::Connection) that holds the
//! delegate, which ties both lifetimes together.
//!
//! # Bindings
//!
//! | Binding            | Without sender            | With sender                          |
//! |--------------------|---------------------------|--------------------------------------|
//! | `&mut self` method | [`Delegate::method`]       | [`Delegate::method_with_sender`]       |
//! | `&self` method     | [`Delegate::const_method`] | [`Delegate::const_method_with_sender`] |
//! | free function      | [`Delegate::function`]     | [`Delegate::function_with_sender`]     |
//! | callable object    | [`Delegate::callable`]     | [`Delegate::callable_with_sender`]     |
//!
//! The sender is passed type-erased as `&dyn Any` and downcast by bindings
//! that asked for one. Bindings without a sender ignore it.
//!
//! # Equality
//!
//! Two delegates compare equal when they bind the same receiver (by address)
//! and the same function (by pointer, or by closure type for callables).
//! Null delegates are equal to each other.
//!
//! # Failure Modes
//!
//! | Condition                         | Result                               |
//! |-----------------------------------|--------------------------------------|
//! | Null delegate                     | [`DispatchError::NullDelegate`]      |
//! | Receiver dropped                  | [`DispatchError::ReceiverDropped`]   |
//! | `RefCell` receiver already borrowed | [`DispatchError::ReceiverBusy`]    |
//! | Sender of another type            | [`DispatchError::SenderMismatch`]    |

use std::any::{Any, TypeId, type_name};
use std::cell::{RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

/// Errors from [`Delegate::try_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// The delegate is not bound to anything.
    NullDelegate,
    /// The receiver was dropped while the delegate still referenced it.
    ReceiverDropped,
    /// A `&mut self` receiver is already borrowed further up the call stack.
    ReceiverBusy,
    /// A sender-aware binding was called with a sender of another type.
    SenderMismatch {
        /// Type name of the sender the binding expects.
        expected: &'static str,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullDelegate => write!(f, "delegate is null"),
            Self::ReceiverDropped => write!(f, "delegate receiver was dropped"),
            Self::ReceiverBusy => write!(f, "delegate receiver is already borrowed"),
            Self::SenderMismatch { expected } => {
                write!(f, "sender type mismatch: expected {expected}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Identity of the bound function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FunctionKey {
    /// Function pointer address.
    Pointer(usize),
    /// Callable object type.
    Callable(TypeId),
}

/// Identity pair compared by delegate equality.
///
/// `receiver` is the address of the bound receiver (0 for free functions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateKey {
    receiver: usize,
    function: FunctionKey,
}

impl DelegateKey {
    /// Address of the bound receiver, or `None` for free functions.
    #[must_use]
    pub fn receiver(&self) -> Option<usize> {
        (self.receiver != 0).then_some(self.receiver)
    }
}

type Invoker<A, R> = dyn Fn(&dyn Any, A) -> Result<R, DispatchError>;

struct Binding<A, R> {
    key: DelegateKey,
    invoker: Rc<Invoker<A, R>>,
}

impl<A, R> Clone for Binding<A, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            invoker: Rc::clone(&self.invoker),
        }
    }
}

/// A bound callable taking a type-erased sender and a payload `A`.
///
/// Cloning is cheap and yields an equal delegate.
pub struct Delegate<A, R = ()> {
    binding: Option<Binding<A, R>>,
}

impl<A, R> Clone for Delegate<A, R> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
        }
    }
}

impl<A, R> Default for Delegate<A, R> {
    fn default() -> Self {
        Self::null()
    }
}

impl<A, R> PartialEq for Delegate<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<A, R> Eq for Delegate<A, R> {}

impl<A, R> fmt::Debug for Delegate<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            None => f.write_str("Delegate(null)"),
            Some(binding) => f
                .debug_struct("Delegate")
                .field("receiver", &binding.key.receiver())
                .field("function", &binding.key.function)
                .finish(),
        }
    }
}

fn address_of<T: ?Sized>(receiver: &Rc<T>) -> usize {
    Rc::as_ptr(receiver).cast::<()>() as usize
}

fn downcast_sender<S: Any>(sender: &dyn Any) -> Result<&S, DispatchError> {
    sender
        .downcast_ref::<S>()
        .ok_or(DispatchError::SenderMismatch {
            expected: type_name::<S>(),
        })
}

fn upgrade<T: ?Sized>(receiver: &Weak<T>) -> Result<Rc<T>, DispatchError> {
    let strong = receiver.upgrade();
    #[cfg(all(feature = "strict", debug_assertions))]
    debug_assert!(strong.is_some(), "delegate dispatched to a dropped receiver");
    strong.ok_or(DispatchError::ReceiverDropped)
}

fn borrow_receiver<T: ?Sized>(cell: &RefCell<T>) -> Result<RefMut<'_, T>, DispatchError> {
    cell.try_borrow_mut().map_err(|_| DispatchError::ReceiverBusy)
}

impl<A, R> Delegate<A, R> {
    /// A delegate bound to nothing.
    #[must_use]
    pub const fn null() -> Self {
        Self { binding: None }
    }

    /// Whether the delegate is bound to nothing.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.binding.is_none()
    }

    /// Unbind, turning this into a null delegate.
    pub fn clear(&mut self) {
        self.binding = None;
    }

    /// Identity of the binding, `None` when null.
    #[must_use]
    pub fn key(&self) -> Option<DelegateKey> {
        self.binding.as_ref().map(|b| b.key)
    }

    /// Call the bound function with a type-erased sender.
    pub(crate) fn dispatch(&self, sender: &dyn Any, args: A) -> Result<R, DispatchError> {
        match &self.binding {
            Some(binding) => (binding.invoker)(sender, args),
            None => Err(DispatchError::NullDelegate),
        }
    }

    /// Call the bound function.
    ///
    /// Bindings without a sender ignore `sender`.
    pub fn try_call<S: Any>(&self, sender: &S, args: A) -> Result<R, DispatchError> {
        self.dispatch(sender, args)
    }

    /// Call the bound function, discarding the reason on failure.
    pub fn call<S: Any>(&self, sender: &S, args: A) -> Option<R> {
        self.dispatch(sender, args).ok()
    }

    fn bind(key: DelegateKey, invoker: Rc<Invoker<A, R>>) -> Self {
        Self {
            binding: Some(Binding { key, invoker }),
        }
    }
}

impl<A: 'static, R: 'static> Delegate<A, R> {
    /// Bind a `&mut self` method of a `RefCell` receiver.
    pub fn method<T>(receiver: &Rc<RefCell<T>>, method: fn(&mut T, A) -> R) -> Self
    where
        T: ?Sized + 'static,
    {
        let key = DelegateKey {
            receiver: address_of(receiver),
            function: FunctionKey::Pointer(method as usize),
        };
        let weak = Rc::downgrade(receiver);
        Self::bind(
            key,
            Rc::new(move |_sender: &dyn Any, args: A| {
                let strong = upgrade(&weak)?;
                let mut target = borrow_receiver(&strong)?;
                Ok(method(&mut *target, args))
            }),
        )
    }

    /// Bind a `&self` method. The receiver manages its own interior state.
    pub fn const_method<T>(receiver: &Rc<T>, method: fn(&T, A) -> R) -> Self
    where
        T: ?Sized + 'static,
    {
        let key = DelegateKey {
            receiver: address_of(receiver),
            function: FunctionKey::Pointer(method as usize),
        };
        let weak = Rc::downgrade(receiver);
        Self::bind(
            key,
            Rc::new(move |_sender: &dyn Any, args: A| {
                let strong = upgrade(&weak)?;
                Ok(method(&*strong, args))
            }),
        )
    }

    /// Bind a free function.
    pub fn function(function: fn(A) -> R) -> Self {
        let key = DelegateKey {
            receiver: 0,
            function: FunctionKey::Pointer(function as usize),
        };
        Self::bind(
            key,
            Rc::new(move |_sender: &dyn Any, args: A| Ok(function(args))),
        )
    }

    /// Bind a callable object kept alive by the caller.
    pub fn callable<F>(callable: &Rc<F>) -> Self
    where
        F: Fn(A) -> R + 'static,
    {
        let key = DelegateKey {
            receiver: address_of(callable),
            function: FunctionKey::Callable(TypeId::of::<F>()),
        };
        let weak = Rc::downgrade(callable);
        Self::bind(
            key,
            Rc::new(move |_sender: &dyn Any, args: A| {
                let strong = upgrade(&weak)?;
                Ok(strong(args))
            }),
        )
    }

    /// Bind a `&mut self` method that also receives the sender.
    pub fn method_with_sender<T, S>(
        receiver: &Rc<RefCell<T>>,
        method: fn(&mut T, &S, A) -> R,
    ) -> Self
    where
        T: ?Sized + 'static,
        S: Any,
    {
        let key = DelegateKey {
            receiver: address_of(receiver),
            function: FunctionKey::Pointer(method as usize),
        };
        let weak = Rc::downgrade(receiver);
        Self::bind(
            key,
            Rc::new(move |sender: &dyn Any, args: A| {
                let sender = downcast_sender::<S>(sender)?;
                let strong = upgrade(&weak)?;
                let mut target = borrow_receiver(&strong)?;
                Ok(method(&mut *target, sender, args))
            }),
        )
    }

    /// Bind a `&self` method that also receives the sender.
    pub fn const_method_with_sender<T, S>(receiver: &Rc<T>, method: fn(&T, &S, A) -> R) -> Self
    where
        T: ?Sized + 'static,
        S: Any,
    {
        let key = DelegateKey {
            receiver: address_of(receiver),
            function: FunctionKey::Pointer(method as usize),
        };
        let weak = Rc::downgrade(receiver);
        Self::bind(
            key,
            Rc::new(move |sender: &dyn Any, args: A| {
                let sender = downcast_sender::<S>(sender)?;
                let strong = upgrade(&weak)?;
                Ok(method(&*strong, sender, args))
            }),
        )
    }

    /// Bind a free function that also receives the sender.
    pub fn function_with_sender<S: Any>(function: fn(&S, A) -> R) -> Self {
        let key = DelegateKey {
            receiver: 0,
            function: FunctionKey::Pointer(function as usize),
        };
        Self::bind(
            key,
            Rc::new(move |sender: &dyn Any, args: A| {
                let sender = downcast_sender::<S>(sender)?;
                Ok(function(sender, args))
            }),
        )
    }

    /// Bind a callable object that also receives the sender.
    pub fn callable_with_sender<S, F>(callable: &Rc<F>) -> Self
    where
        S: Any,
        F: Fn(&S, A) -> R + 'static,
    {
        let key = DelegateKey {
            receiver: address_of(callable),
            function: FunctionKey::Callable(TypeId::of::<F>()),
        };
        let weak = Rc::downgrade(callable);
        Self::bind(
            key,
            Rc::new(move |sender: &dyn Any, args: A| {
                let sender = downcast_sender::<S>(sender)?;
                let strong = upgrade(&weak)?;
                Ok(strong(sender, args))
            }),
        )
    }

    /// Bind a `&self` method that forwards the type-erased sender untouched.
    pub(crate) fn forwarding<T>(receiver: &Rc<T>, method: fn(&T, &dyn Any, A) -> R) -> Self
    where
        T: 'static,
    {
        let key = DelegateKey {
            receiver: address_of(receiver),
            function: FunctionKey::Pointer(method as usize),
        };
        let weak = Rc::downgrade(receiver);
        Self::bind(
            key,
            Rc::new(move |sender: &dyn Any, args: A| {
                let strong = upgrade(&weak)?;
                Ok(method(&*strong, sender, args))
            }),
        )
    }
}
