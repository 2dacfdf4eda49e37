//! # ambi-grabber: Ambient Light Grabber
//!
//! Reads captured frames, turns them into LED colors with the
//! `ambi-core` pipeline and streams them to a Hyperion server, a WLED
//! device or an Adalight serial controller.
//!
//! ## Inputs
//!
//! - **Raw frames**: packed RGBA8888 or RGB565 frames from a file or stdin.
//! - **Test pattern**: drifting color bars with a letterbox, for checking
//!   a strip without a capture source.

pub mod config;
pub mod service;
pub mod source;
