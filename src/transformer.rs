use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::class_cache::{CacheHierarchy, ClassCache, ClassLoader, ClassMetadata, ClassName};
use crate::class_reader::{ClassFile, ClassReader};
use crate::class_visitor::InstrumentingClassVisitor;
use crate::class_writer::write_class_file;
use crate::constant_pool::ConstantPool;
use crate::error::{ClassReadError, Error};
use crate::instrumentors::ProbeCode;
use crate::location::Location;
use crate::method_visitor::RewriteTarget;
use crate::options::TransformOptions;

/// One probe: which methods it targets, where inside them it fires and the
/// code it injects there.
#[derive(Clone)]
pub struct Probe {
    /// Exact class name in either form, or `+Name` for `Name` and its subtypes.
    pub clazz: String,
    /// Method name; empty matches every method.
    pub method: String,
    /// Optional method descriptor filter.
    pub method_type: Option<String>,
    pub location: Location,
    pub code: Arc<dyn ProbeCode + Send + Sync>,
}

impl Probe {
    pub fn new(
        clazz: impl Into<String>,
        method: impl Into<String>,
        location: Location,
        code: impl ProbeCode + Send + Sync + 'static,
    ) -> Self {
        Self {
            clazz: clazz.into(),
            method: method.into(),
            method_type: None,
            location,
            code: Arc::new(code),
        }
    }

    pub fn with_method_type(mut self, descriptor: impl Into<String>) -> Self {
        self.method_type = Some(descriptor.into());
        self
    }

    pub fn applies_to_method(&self, name: &str, descriptor: &str) -> bool {
        (self.method.is_empty() || self.method == name)
            && self
                .method_type
                .as_deref()
                .is_none_or(|wanted| wanted == descriptor)
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("clazz", &self.clazz)
            .field("method", &self.method)
            .field("method_type", &self.method_type)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Rewrites class bytes for a fixed set of probes.
///
/// A transformer holds no per-class state, so one instance can serve
/// several threads at once. The metadata cache is the only shared resource.
pub struct Transformer<'c> {
    cache: &'c ClassCache,
    probes: Vec<Probe>,
    options: TransformOptions,
}

impl<'c> Transformer<'c> {
    pub fn new(cache: &'c ClassCache, probes: Vec<Probe>) -> Self {
        Self {
            cache,
            probes,
            options: TransformOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransformOptions) -> Self {
        self.options = options;
        self
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Rewritten bytes, or `None` when no probe changes the class.
    pub fn try_transform(
        &self,
        loader: Option<&dyn ClassLoader>,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        let reader = ClassReader::new(bytes)?;
        let class_file = reader.class_file();
        let class_name = class_file.name()?.to_string();

        let probes = self.matching_probes(loader, class_file, &class_name)?;
        if probes.is_empty() {
            return Ok(None);
        }

        let hierarchy = CacheHierarchy {
            cache: self.cache,
            loader,
        };
        let target = RewriteTarget::new(
            &class_name,
            class_file.major_version,
            ConstantPool::from_entries(class_file.constant_pool.clone()),
            &hierarchy,
            self.options,
        );
        let mut visitor = InstrumentingClassVisitor::new(target, probes);
        reader.accept(&mut visitor)?;
        let target = visitor.into_target();

        if let Some((method, source)) = target.failure {
            return Err(Error::Instrument {
                class: class_name,
                method,
                source,
            });
        }
        if target.rewritten.is_empty() {
            return Ok(None);
        }
        let out = write_class_file(class_file, &target.pool, &target.rewritten)?;
        debug!(
            "rewrote {} methods of {class_name}, {} -> {} bytes",
            target.rewritten.len(),
            bytes.len(),
            out.len()
        );
        Ok(Some(out))
    }

    /// Like [`Transformer::try_transform`], but any failure leaves the class
    /// as it was.
    pub fn transform<'b>(&self, loader: Option<&dyn ClassLoader>, bytes: &'b [u8]) -> Cow<'b, [u8]> {
        match self.try_transform(loader, bytes) {
            Ok(Some(out)) => Cow::Owned(out),
            Ok(None) => Cow::Borrowed(bytes),
            Err(err) => {
                warn!("class left unmodified: {}", error_chain(&err));
                Cow::Borrowed(bytes)
            }
        }
    }

    fn matching_probes(
        &self,
        loader: Option<&dyn ClassLoader>,
        class_file: &ClassFile,
        class_name: &str,
    ) -> Result<Vec<&Probe>, ClassReadError> {
        let needs_metadata = self.probes.iter().any(|p| p.clazz.starts_with('+'));
        let metadata = if needs_metadata {
            Some(ClassMetadata::from_class_file(
                class_file,
                loader.map(|l| l.key()),
            )?)
        } else {
            None
        };
        let name = ClassName::new(class_name);
        Ok(self
            .probes
            .iter()
            .filter(|probe| {
                let pattern = probe.clazz.as_str();
                if pattern.is_empty() {
                    return false;
                }
                if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
                    warn!("regular expression class pattern {pattern} is not supported");
                    return false;
                }
                match (pattern.strip_prefix('+'), &metadata) {
                    (Some(supertype), Some(metadata)) => {
                        metadata.is_subtype_of(self.cache, loader, supertype)
                    }
                    _ => ClassName::new(pattern) == name,
                }
            })
            .collect())
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
