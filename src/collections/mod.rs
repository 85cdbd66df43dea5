//! Collection primitives shared by the event and channel layers.

pub mod ordered_map;

pub use ordered_map::OrderedMap;
