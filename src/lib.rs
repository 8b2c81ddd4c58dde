//! Resolution, parsing, annotation and staging of genomic data files for a
//! portal loader.
//!
//! The flow for one source file is [`archive::resolve`] to find the logical
//! file inside any gzip/tar/zip wrapper, [`matrix::MatrixBuilder`] to read it
//! into a [`matrix::DataMatrix`], and [`staging::StagingArea`] to write it
//! out. Mutation tables additionally pass through the
//! [`pipeline::AnnotationPipeline`] before they are staged.

pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod matrix;
pub mod output;
pub mod pipeline;
pub mod staging;
pub mod tools;
