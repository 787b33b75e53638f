use log::debug;

use crate::class_reader::{ClassVisitor, MethodVisitor};
use crate::constants;
use crate::instrumentors::build_chain;
use crate::method_visitor::{InstrumentingMethodVisitor, MethodContext, RewriteTarget};
use crate::transformer::Probe;

/// Drives one class rewrite.
///
/// Every method with at least one applicable probe gets a fresh
/// [`InstrumentingMethodVisitor`], so no two methods share slot, handler or
/// frame state. New `Code` payloads and the first failure end up in the
/// [`RewriteTarget`].
pub struct InstrumentingClassVisitor<'a> {
    target: RewriteTarget<'a>,
    probes: Vec<&'a Probe>,
    method_index: usize,
}

impl<'a> InstrumentingClassVisitor<'a> {
    pub fn new(target: RewriteTarget<'a>, probes: Vec<&'a Probe>) -> Self {
        Self {
            target,
            probes,
            method_index: 0,
        }
    }

    /// Internal name of the class, known once `visit` has run.
    pub fn class_name(&self) -> &str {
        &self.target.class_name
    }

    pub fn into_target(self) -> RewriteTarget<'a> {
        self.target
    }
}

impl ClassVisitor for InstrumentingClassVisitor<'_> {
    fn visit(
        &mut self,
        major: u16,
        _minor: u16,
        _access_flags: u16,
        name: &str,
        _super_name: Option<&str>,
        _interfaces: &[String],
    ) {
        self.target.class_name = name.to_string();
        self.target.major_version = major;
    }

    fn visit_method<'v>(
        &'v mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
    ) -> Option<Box<dyn MethodVisitor + 'v>> {
        let index = self.method_index;
        self.method_index += 1;

        if access_flags & (constants::ACC_ABSTRACT | constants::ACC_NATIVE) != 0
            || self.target.options.skips_method(access_flags, name)
            || self.target.failure.is_some()
        {
            return None;
        }
        let probes: Vec<&'v Probe> = self
            .probes
            .iter()
            .copied()
            .filter(|probe| probe.applies_to_method(name, descriptor))
            .collect();
        if probes.is_empty() {
            return None;
        }
        debug!(
            "instrumenting {}.{name}{descriptor} with {} probes",
            self.target.class_name,
            probes.len()
        );

        let method = MethodContext {
            index,
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        let core = InstrumentingMethodVisitor::new(&mut self.target, method.clone());
        let chain: Box<dyn MethodVisitor + 'v> = build_chain(Box::new(core), &probes, &method);
        Some(chain)
    }
}
