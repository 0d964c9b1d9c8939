// Core modules implementing resolution, the file model, and error modeling.
pub mod actions;
pub mod atom;
pub mod error;
pub mod fileset;
pub mod launcher;
pub mod library;
pub mod packagefile;
