//! Load-time bytecode instrumentation for JVM class files.
//!
//! A [`Transformer`] takes raw class bytes and a set of [`Probe`]s and returns
//! rewritten bytes. Each matching method is replayed through a chain of
//! kind-specific instrumentors sitting on an [`InstrumentingMethodVisitor`],
//! which hands out scratch locals, merges injected exception handlers into
//! the original table and emits stack map frames for injected join points.

#[macro_use]
mod macros;

pub mod opcodes;
pub mod constants;
pub mod error;
pub mod types;
pub mod insn;
pub mod frame;
pub mod constant_pool;
pub mod class_reader;
pub mod class_writer;
pub mod nodes;
pub mod class_cache;
pub mod location;
pub mod options;
pub mod method_state;
pub mod facade;
pub mod method_visitor;
pub mod class_visitor;
pub mod instrumentors;
pub mod transformer;

pub use class_cache::{ClassCache, ClassLoader, ClassMetadata, ClassName, MemoryClassLoader};
pub use class_reader::{ClassReader, ClassVisitor, MethodVisitor};
pub use class_writer::ClassWriter;
pub use error::{ClassReadError, ClassWriteError, Error, InstrumentError, ResolveError};
pub use facade::{MethodInstrumentor, MethodInstrumentorHelper};
pub use instrumentors::{InjectionSite, ProbeCode};
pub use location::{Kind, Location, Where};
pub use method_visitor::InstrumentingMethodVisitor;
pub use options::{TransformFlags, TransformOptions};
pub use transformer::{Probe, Transformer};
