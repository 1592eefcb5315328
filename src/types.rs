//! Core types for spark-reconciler.
//!
//! These types define the foundation that everything builds on.
//! They flow from callers through the scheduler into the work loop and define
//! what the tree, the update queues and the context resolver understand.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

// =============================================================================
// Deadline - Priority of a requested update
// =============================================================================

/// Largest value representable as a signed 31-bit integer.
const MAX_SIGNED_31_BIT_INT: u32 = 1_073_741_823;

/// An opaque priority deadline ("expiration time").
///
/// Smaller means more urgent. [`Deadline::SYNC`] is the most urgent value,
/// [`Deadline::NEVER`] the least urgent one. "No pending work" is expressed as
/// `Option::<Deadline>::None`, never as a sentinel deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(u32);

impl Deadline {
    /// Must be satisfied in the current synchronous batch.
    pub const SYNC: Self = Self(1);

    /// Offscreen / idle work. Never expires.
    pub const NEVER: Self = Self(MAX_SIGNED_31_BIT_INT);

    /// Build a deadline from raw units. Zero means "no work".
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Build a deadline from units already known to be non-zero.
    pub(crate) const fn from_units(raw: u32) -> Self {
        debug_assert!(raw != 0);
        Self(raw)
    }

    /// Raw units (10ms buckets offset by two).
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Check if `self` must be satisfied before `other`.
    #[inline]
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self < other
    }

    /// Check if a pass rendering at `render` includes work at `self`.
    #[inline]
    pub fn is_satisfied_by(self, render: Self) -> bool {
        self <= render
    }

    /// Next less urgent deadline (one unit later).
    pub(crate) fn bumped(self) -> Self {
        Self((self.0 + 1).min(MAX_SIGNED_31_BIT_INT))
    }

    /// The more urgent of two optional deadlines, treating `None` as no work.
    pub fn most_urgent(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

// =============================================================================
// Mode & Effect Flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Scheduling mode of a work node, inherited by its descendants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mode: u8 {
        const NONE = 0;
        const CONCURRENT = 1 << 0;
        const STRICT = 1 << 1;
        const PROFILE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Side effects a work node carries into commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EffectTag: u16 {
        const NONE = 0;
        const PLACEMENT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETION = 1 << 3;
        const CALLBACK = 1 << 5;
        const PASSIVE = 1 << 9;
    }
}

// =============================================================================
// Work Tags - Node kinds
// =============================================================================

/// Kind of a work node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkTag {
    FunctionComponent = 0,
    ClassComponent = 1,
    HostRoot = 3,
    HostPortal = 4,
    HostComponent = 5,
    HostText = 6,
    Fragment = 7,
    Mode = 8,
}

impl WorkTag {
    /// Host-kind nodes are backed by a concrete host instance.
    #[inline]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::HostComponent | Self::HostText)
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Generational index of a work node in a [`WorkTree`](crate::engine::WorkTree).
///
/// A freed slot bumps its generation, so stale ids never alias a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    /// Slot index (stable while the node lives).
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// Index of a mounted root in a [`WorkTree`](crate::engine::WorkTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(pub(crate) u32);

thread_local! {
    /// Counter for minting component handles, unique per thread.
    static HANDLE_COUNTER: Cell<u64> = const { Cell::new(1) };
}

/// Logical handle to a composite component instance.
///
/// Handles minted with [`ComponentHandle::component`] look like components
/// (they carry a render capability) whether or not the reconciler ever
/// attached them to a node. Handles built with [`ComponentHandle::foreign`]
/// stand for arbitrary caller objects and never look like components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentHandle {
    id: u64,
    renderable: bool,
}

impl ComponentHandle {
    /// Mint a fresh component handle.
    pub fn component() -> Self {
        let id = HANDLE_COUNTER.with(|counter| {
            let id = counter.get();
            counter.set(id + 1);
            id
        });
        Self { id, renderable: true }
    }

    /// Wrap an id that belongs to some foreign, non-component object.
    pub const fn foreign(id: u64) -> Self {
        Self { id, renderable: false }
    }

    pub const fn id(self) -> u64 {
        self.id
    }

    /// Check if the handle exposes a render capability.
    pub const fn is_renderable(self) -> bool {
        self.renderable
    }
}

// =============================================================================
// Values & Context Objects
// =============================================================================

/// A plain value stored in props and context objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

/// Props passed to an element.
pub type Props = BTreeMap<String, Value>;

thread_local! {
    /// The canonical empty context. Every "no parent" lookup returns this exact object.
    static EMPTY_CONTEXT: ContextObject = ContextObject(Rc::new(BTreeMap::new()));
}

/// Immutable ambient key/value mapping visible to context consumers.
///
/// Cloning is cheap and preserves identity; [`ContextObject::ptr_eq`] compares
/// identity, `==` compares contents.
#[derive(Debug, Clone)]
pub struct ContextObject(Rc<BTreeMap<String, Value>>);

impl ContextObject {
    /// Create a context object from owned values.
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self(Rc::new(values))
    }

    /// The canonical empty context object.
    pub fn empty() -> Self {
        EMPTY_CONTEXT.with(|empty| empty.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Check if both objects are the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// New object with `overrides` layered on top (overrides win on collision).
    pub fn merged_with(&self, overrides: &BTreeMap<String, Value>) -> Self {
        let mut merged = (*self.0).clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        Self::new(merged)
    }
}

impl PartialEq for ContextObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ContextObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// =============================================================================
// Component Types
// =============================================================================

/// Produces the child context of a legacy provider from its current props.
pub type ChildContextFn = Rc<dyn Fn(&Props) -> BTreeMap<String, Value>>;

/// A class-style composite component.
///
/// A class that declares `child_context_types` is a legacy context provider.
pub struct ClassComponent {
    pub name: String,
    /// Context keys this component consumes (masked context).
    pub context_types: Option<Vec<String>>,
    /// Context keys this component provides to its subtree.
    pub child_context_types: Option<Vec<String>>,
    pub get_child_context: Option<ChildContextFn>,
}

impl ClassComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_types: None,
            child_context_types: None,
            get_child_context: None,
        }
    }

    /// Declare the context keys this component reads.
    pub fn with_context_types<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_types = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Declare this component as a legacy provider of `keys`.
    pub fn provides<I, S>(
        mut self,
        keys: I,
        get_child_context: impl Fn(&Props) -> BTreeMap<String, Value> + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child_context_types = Some(keys.into_iter().map(Into::into).collect());
        self.get_child_context = Some(Rc::new(get_child_context));
        self
    }

    /// Check if this class provides legacy child context.
    pub fn is_legacy_context_provider(&self) -> bool {
        self.child_context_types.is_some()
    }
}

impl fmt::Debug for ClassComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassComponent")
            .field("name", &self.name)
            .field("context_types", &self.context_types)
            .field("child_context_types", &self.child_context_types)
            .field("get_child_context", &self.get_child_context.is_some())
            .finish()
    }
}

/// A function-style composite component.
#[derive(Debug)]
pub struct FunctionComponent {
    pub name: String,
    pub context_types: Option<Vec<String>>,
}

impl FunctionComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_types: None,
        }
    }
}

/// The `type` of an element and of the work node created from it.
#[derive(Debug, Clone)]
pub enum ElementType {
    /// Host element with its host tag (e.g. "div", "box").
    Host(Rc<str>),
    Text,
    Class(Rc<ClassComponent>),
    Function(Rc<FunctionComponent>),
    /// Renders its children into another container (prop `container`).
    Portal,
    StrictMode,
    Fragment,
}

impl ElementType {
    /// Display name used in diagnostics.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Host(tag) => Some(tag),
            Self::Class(class) => Some(&class.name),
            Self::Function(function) => Some(&function.name),
            Self::StrictMode => Some("StrictMode"),
            Self::Text | Self::Portal | Self::Fragment => None,
        }
    }

    /// The work tag of nodes created for this type.
    pub fn work_tag(&self) -> WorkTag {
        match self {
            Self::Host(_) => WorkTag::HostComponent,
            Self::Text => WorkTag::HostText,
            Self::Class(_) => WorkTag::ClassComponent,
            Self::Function(_) => WorkTag::FunctionComponent,
            Self::Portal => WorkTag::HostPortal,
            Self::StrictMode => WorkTag::Mode,
            Self::Fragment => WorkTag::Fragment,
        }
    }
}

impl PartialEq for ElementType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Text, Self::Text)
            | (Self::Portal, Self::Portal)
            | (Self::StrictMode, Self::StrictMode)
            | (Self::Fragment, Self::Fragment) => true,
            _ => false,
        }
    }
}

// =============================================================================
// Element - Tree description
// =============================================================================

/// An immutable description of a subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Rc<str>>,
    pub props: Props,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            props: Props::new(),
            children: Vec::new(),
        }
    }

    pub fn host(tag: &str) -> Self {
        Self::new(ElementType::Host(tag.into()))
    }

    pub fn text(content: &str) -> Self {
        Self::new(ElementType::Text).with_prop("text", content)
    }

    pub fn class(class: &Rc<ClassComponent>) -> Self {
        Self::new(ElementType::Class(class.clone()))
    }

    pub fn function(function: &Rc<FunctionComponent>) -> Self {
        Self::new(ElementType::Function(function.clone()))
    }

    pub fn portal(container: &str) -> Self {
        Self::new(ElementType::Portal).with_prop("container", container)
    }

    pub fn strict_mode() -> Self {
        Self::new(ElementType::StrictMode)
    }

    pub fn fragment() -> Self {
        Self::new(ElementType::Fragment)
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_prop(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.props.insert(name.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
