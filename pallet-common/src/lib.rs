//! Shared file-format helpers for the pallet workspace.
//!
//! Every on-disk contract of the lifecycle is either TOML (group, plan,
//! layer sidecars, launch tables) or JSON (image metadata, OCI layout
//! documents). The helpers here are the only place that touches the codecs
//! directly, so phases deal in typed values and a single error per format.

pub mod json_file;
pub mod toml_file;
