#![doc = include_str!("../../../README.md")]

mod compile;
mod dataset;
mod directive;
mod dump;
mod engine;
mod error;
mod eval;
mod expr;
mod node;
mod output;
mod registry;
mod render;
mod scope;
mod token;
mod value;

pub use crate::{
    dataset::Dataset,
    engine::Engine,
    error::{EngineResult, Error, ErrorKind},
    output::{CollectString, NullSink, OutputSink, StdoutSink},
    registry::{NativeFunction, StringFunction},
    scope::Resolver,
    value::Value,
};
