//! Edit operations and their sequential composition.
//!
//! The engine does not run operational transform or a CRDT. Each document
//! has a single authoritative order of accepted operations, and text state is
//! the base text composed with that sequence.
//!
//! | Item | Description |
//! |------|-------------|
//! | [`Operation`] | Retain / insert / delete steps, with its delta wire form |
//! | [`compose`] | Folds one operation into a text |
//! | [`Operation::merge`] | Folds two operations into one |
//!
//! # Examples
//!
//! ```
//! use docsync_axum::merge::{compose, Operation};
//!
//! let text = "foo";
//! let append = Operation::new().retain(3).insert("bar");
//! let trim = Operation::new().delete(3);
//!
//! let stepwise = compose(&compose(text, &append).unwrap(), &trim).unwrap();
//! let batched = compose(text, &append.merge(&trim)).unwrap();
//! assert_eq!(stepwise, "bar");
//! assert_eq!(batched, "bar");
//! ```

pub mod compose;
pub mod delta;

pub use compose::compose;
pub use delta::{Insert, Operation, Step, EMBED_CHAR};
