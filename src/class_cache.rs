use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace};

use crate::class_reader::{ClassFile, read_class_file};
use crate::constants;
use crate::error::{ClassReadError, ResolveError};
use crate::frame::TypeHierarchy;

/// A class name in either Java (`a.b.C`) or internal (`a/b/C`) form.
/// Two names are equal when they differ only in separator style.
#[derive(Debug, Clone)]
pub struct ClassName {
    internal: String,
}

impl ClassName {
    pub fn new(name: &str) -> Self {
        Self {
            internal: name.replace('.', "/"),
        }
    }

    pub fn internal(&self) -> &str {
        &self.internal
    }

    pub fn java(&self) -> String {
        self.internal.replace('/', ".")
    }

    pub fn resource_path(&self) -> String {
        format!("{}.class", self.internal)
    }
}

impl PartialEq for ClassName {
    fn eq(&self, other: &Self) -> bool {
        self.internal == other.internal
    }
}

impl Eq for ClassName {}

impl Hash for ClassName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.internal.hash(state);
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.internal)
    }
}

impl From<&str> for ClassName {
    fn from(value: &str) -> Self {
        ClassName::new(value)
    }
}

/// Identity of one loader generation. A loader that is torn down and
/// recreated with the same id gets a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderKey {
    pub id: u64,
    pub generation: u64,
}

impl fmt::Display for LoaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}.{}", self.id, self.generation)
    }
}

/// The defining scope of classes. Implementations only hand out bytes; the
/// cache decides which loader in the parent chain defines a class.
pub trait ClassLoader: Send + Sync {
    fn id(&self) -> u64;

    fn generation(&self) -> u64 {
        0
    }

    fn parent(&self) -> Option<&dyn ClassLoader>;

    /// Raw class bytes this loader itself can supply, without delegating.
    fn find_class_bytes(&self, internal_name: &str) -> Option<Vec<u8>>;

    fn key(&self) -> LoaderKey {
        LoaderKey {
            id: self.id(),
            generation: self.generation(),
        }
    }
}

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// A loader over an in-memory set of class files.
pub struct MemoryClassLoader {
    id: u64,
    generation: u64,
    parent: Option<Arc<dyn ClassLoader>>,
    classes: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryClassLoader {
    pub fn new() -> Self {
        Self {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
            parent: None,
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_parent(parent: Arc<dyn ClassLoader>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// A loader that reuses `id` under a later generation.
    pub fn next_generation(&self) -> Self {
        Self {
            id: self.id,
            generation: self.generation + 1,
            parent: self.parent.clone(),
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn define(&self, name: &str, bytes: Vec<u8>) {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ClassName::new(name).internal, bytes);
    }
}

impl Default for MemoryClassLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClassLoader")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl ClassLoader for MemoryClassLoader {
    fn id(&self) -> u64 {
        self.id
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn parent(&self) -> Option<&dyn ClassLoader> {
        self.parent.as_deref()
    }

    fn find_class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(internal_name)
            .cloned()
    }
}

/// A loaded class seen from the outside: its name and defining loader.
#[derive(Clone, Copy)]
pub struct LoadedClass<'a> {
    pub loader: Option<&'a dyn ClassLoader>,
    pub name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
}

/// Structural facts about one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    pub name: ClassName,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub methods: Vec<MemberInfo>,
    pub fields: Vec<MemberInfo>,
    /// `None` for bootstrap classes.
    pub loader: Option<LoaderKey>,
}

impl ClassMetadata {
    pub fn from_class_file(
        class: &ClassFile,
        loader: Option<LoaderKey>,
    ) -> Result<Self, ClassReadError> {
        let methods = class
            .methods
            .iter()
            .map(|m| member_info(class, m.access_flags, m.name_index, m.descriptor_index))
            .collect::<Result<Vec<_>, _>>()?;
        let fields = class
            .fields
            .iter()
            .map(|f| member_info(class, f.access_flags, f.name_index, f.descriptor_index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: ClassName::new(class.name()?),
            super_name: class.super_name()?.map(str::to_string),
            interfaces: class.interface_names()?,
            is_interface: class.access_flags & constants::ACC_INTERFACE != 0,
            methods,
            fields,
            loader,
        })
    }

    /// Direct supertypes: the superclass first, then interfaces in declaration order.
    pub fn direct_supertypes(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }

    /// Supertype names, nearest first. A supertype whose metadata cannot be
    /// resolved is still listed, but its own supertypes are unknown.
    pub fn supertypes(
        &self,
        cache: &ClassCache,
        loader: Option<&dyn ClassLoader>,
        only_direct: bool,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue: VecDeque<String> = self.direct_supertypes().map(str::to_string).collect();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if !only_direct {
                match cache.resolve(loader, &name) {
                    Ok(info) => queue.extend(info.direct_supertypes().map(str::to_string)),
                    Err(err) => debug!("supertypes of {name} unknown: {err}"),
                }
            }
            out.push(name);
        }
        out
    }

    pub fn is_subtype_of(
        &self,
        cache: &ClassCache,
        loader: Option<&dyn ClassLoader>,
        name: &str,
    ) -> bool {
        let wanted = ClassName::new(name);
        self.name == wanted
            || self
                .supertypes(cache, loader, false)
                .iter()
                .any(|candidate| ClassName::new(candidate) == wanted)
    }

    pub fn declares_method(&self, name: &str, descriptor: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn declares_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

fn member_info(
    class: &ClassFile,
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
) -> Result<MemberInfo, ClassReadError> {
    Ok(MemberInfo {
        access_flags,
        name: class.cp_utf8(name_index)?.to_string(),
        descriptor: class.cp_utf8(descriptor_index)?.to_string(),
    })
}

type ClassMap = HashMap<String, Arc<ClassMetadata>>;

/// Memoized class metadata, one submap per loader generation plus one for
/// bootstrap classes.
///
/// Construct one per process and share it by reference. Entries for a loader
/// live until [`ClassCache::loader_unloaded`] is called for it.
pub struct ClassCache {
    bootstrap: Option<Arc<dyn ClassLoader>>,
    bootstrap_classes: RwLock<ClassMap>,
    loaders: RwLock<HashMap<LoaderKey, Arc<RwLock<ClassMap>>>>,
}

impl Default for ClassCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClassCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassCache")
            .field("loaders", &self.loader_count())
            .finish()
    }
}

impl ClassCache {
    /// A cache whose bootstrap classes cannot be resolved.
    pub fn new() -> Self {
        Self {
            bootstrap: None,
            bootstrap_classes: RwLock::new(HashMap::new()),
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// A cache that reads bootstrap classes through `source`.
    pub fn with_bootstrap(source: Arc<dyn ClassLoader>) -> Self {
        Self {
            bootstrap: Some(source),
            ..Self::new()
        }
    }

    /// Metadata for `name` as seen from `loader` (`None` is the bootstrap loader).
    ///
    /// Lookup is parent-first. On a miss the class is read from the loader
    /// that defines it and stored under that loader. Failures are not cached.
    pub fn resolve(
        &self,
        loader: Option<&dyn ClassLoader>,
        name: &str,
    ) -> Result<Arc<ClassMetadata>, ResolveError> {
        let name = ClassName::new(name);
        if let Some(hit) = self.lookup(loader, &name) {
            return Ok(hit);
        }

        let (defining, bytes) = self.locate(loader, &name).ok_or_else(|| ResolveError::NotFound {
            loader: loader.map_or_else(|| "bootstrap".to_string(), |l| l.key().to_string()),
            name: name.to_string(),
        })?;
        let defining_key = defining.map(|l| l.key());
        let read = |source| ResolveError::Read {
            name: name.to_string(),
            source,
        };
        let class = read_class_file(&bytes).map_err(read)?;
        let metadata = Arc::new(ClassMetadata::from_class_file(&class, defining_key).map_err(read)?);

        let map = match defining_key {
            Some(key) => self.submap(key),
            None => {
                let mut classes = self
                    .bootstrap_classes
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                return Ok(classes
                    .entry(name.internal().to_string())
                    .or_insert(metadata)
                    .clone());
            }
        };
        let mut classes = map.write().unwrap_or_else(PoisonError::into_inner);
        trace!("cached {name} for {:?}", defining_key);
        Ok(classes
            .entry(name.internal().to_string())
            .or_insert(metadata)
            .clone())
    }

    /// Same as [`ClassCache::resolve`] with the key taken from a loaded class.
    pub fn resolve_loaded(&self, class: LoadedClass<'_>) -> Result<Arc<ClassMetadata>, ResolveError> {
        self.resolve(class.loader, class.name)
    }

    /// Drops every entry defined by that loader generation.
    pub fn loader_unloaded(&self, id: u64, generation: u64) {
        let removed = self
            .loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&LoaderKey { id, generation });
        if removed.is_some() {
            debug!("dropped class metadata for loader#{id}.{generation}");
        }
    }

    /// Number of loader generations that currently own a submap.
    pub fn loader_count(&self) -> usize {
        self.loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lookup(&self, loader: Option<&dyn ClassLoader>, name: &ClassName) -> Option<Arc<ClassMetadata>> {
        if let Some(hit) = self
            .bootstrap_classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name.internal())
        {
            return Some(hit.clone());
        }
        let loaders = self.loaders.read().unwrap_or_else(PoisonError::into_inner);
        for ancestor in chain_root_first(loader) {
            if let Some(map) = loaders.get(&ancestor.key()) {
                let classes = map.read().unwrap_or_else(PoisonError::into_inner);
                if let Some(hit) = classes.get(name.internal()) {
                    return Some(hit.clone());
                }
            }
        }
        None
    }

    /// Finds the defining loader the way delegation would: bootstrap first,
    /// then the ancestors from the root down.
    fn locate<'l>(
        &self,
        loader: Option<&'l dyn ClassLoader>,
        name: &ClassName,
    ) -> Option<(Option<&'l dyn ClassLoader>, Vec<u8>)> {
        if let Some(bytes) = self
            .bootstrap
            .as_ref()
            .and_then(|source| source.find_class_bytes(name.internal()))
        {
            return Some((None, bytes));
        }
        chain_root_first(loader)
            .into_iter()
            .find_map(|ancestor| {
                ancestor
                    .find_class_bytes(name.internal())
                    .map(|bytes| (Some(ancestor), bytes))
            })
    }

    fn submap(&self, key: LoaderKey) -> Arc<RwLock<ClassMap>> {
        if let Some(map) = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return map.clone();
        }
        let mut loaders = self.loaders.write().unwrap_or_else(PoisonError::into_inner);
        loaders
            .entry(key)
            .or_insert_with(|| {
                debug!("created class metadata map for {key}");
                Arc::new(RwLock::new(HashMap::new()))
            })
            .clone()
    }
}

fn chain_root_first(loader: Option<&dyn ClassLoader>) -> Vec<&dyn ClassLoader> {
    let mut chain = Vec::new();
    let mut current = loader;
    while let Some(l) = current {
        chain.push(l);
        current = l.parent();
    }
    chain.reverse();
    chain
}

/// Answers verifier merges from the cache, as seen from one loader.
pub struct CacheHierarchy<'a> {
    pub cache: &'a ClassCache,
    pub loader: Option<&'a dyn ClassLoader>,
}

impl CacheHierarchy<'_> {
    fn superclass_chain(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        let mut chain = vec![name.to_string()];
        let mut current = self.cache.resolve(self.loader, name)?;
        while let Some(super_name) = current.super_name.clone() {
            chain.push(super_name.clone());
            match self.cache.resolve(self.loader, &super_name) {
                Ok(next) => current = next,
                Err(_) if super_name == constants::OBJECT => break,
                Err(err) => return Err(err),
            }
        }
        Ok(chain)
    }
}

impl TypeHierarchy for CacheHierarchy<'_> {
    fn common_superclass(&self, left: &str, right: &str) -> String {
        if left == right {
            return left.to_string();
        }
        let result = (|| -> Result<String, ResolveError> {
            let left_info = self.cache.resolve(self.loader, left)?;
            let right_info = self.cache.resolve(self.loader, right)?;
            if left_info.is_interface || right_info.is_interface {
                return Ok(constants::OBJECT.to_string());
            }
            let left_chain = self.superclass_chain(left)?;
            Ok(self
                .superclass_chain(right)?
                .into_iter()
                .find(|candidate| left_chain.contains(candidate))
                .unwrap_or_else(|| constants::OBJECT.to_string()))
        })();
        result.unwrap_or_else(|err| {
            debug!("common superclass of {left} and {right} unknown: {err}");
            constants::OBJECT.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_writer::ClassWriter;

    fn class_bytes(name: &str, super_name: &str, interfaces: &[&str], access: u16) -> Vec<u8> {
        let mut cw = ClassWriter::new();
        cw.visit(52, 0, access, name, Some(super_name), interfaces);
        cw.visit_field(0x0002, "count", "I");
        let mv = cw.visit_method(0x0401, "run", "()V");
        mv.finish(&mut cw);
        cw.to_bytes().unwrap()
    }

    fn sample_loader() -> Arc<MemoryClassLoader> {
        let loader = MemoryClassLoader::new();
        loader.define("a/Base", class_bytes("a/Base", "java/lang/Object", &["a/Marker"], 0x0021));
        loader.define("a/Marker", class_bytes("a/Marker", "java/lang/Object", &[], 0x0601));
        loader.define("a/Child", class_bytes("a/Child", "a/Base", &[], 0x0021));
        loader.define("a/Other", class_bytes("a/Other", "a/Base", &[], 0x0021));
        Arc::new(loader)
    }

    #[test]
    fn test_class_name_forms() {
        let name = ClassName::new("java.lang.String");
        assert_eq!(name.internal(), "java/lang/String");
        assert_eq!(name.java(), "java.lang.String");
        assert_eq!(name.resource_path(), "java/lang/String.class");
        assert_eq!(name, ClassName::new("java/lang/String"));
    }

    #[test]
    fn test_resolve_returns_cached_instance() {
        let cache = ClassCache::new();
        let loader = sample_loader();
        let first = cache.resolve(Some(&*loader), "a.Child").unwrap();
        let second = cache.resolve(Some(&*loader), "a/Child").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.super_name.as_deref(), Some("a/Base"));
        assert!(first.declares_field("count"));
        assert!(first.declares_method("run", "()V"));
        assert_eq!(cache.loader_count(), 1);
    }

    #[test]
    fn test_new_loader_gets_fresh_instance() {
        let cache = ClassCache::new();
        let first_loader = sample_loader();
        let second_loader = sample_loader();
        let first = cache.resolve(Some(&*first_loader), "a/Child").unwrap();
        let second = cache.resolve(Some(&*second_loader), "a/Child").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.loader_count(), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = ClassCache::new();
        let loader = MemoryClassLoader::new();
        assert!(matches!(
            cache.resolve(Some(&loader), "a/Late"),
            Err(ResolveError::NotFound { .. })
        ));
        loader.define("a/Late", class_bytes("a/Late", "java/lang/Object", &[], 0x0021));
        assert!(cache.resolve(Some(&loader), "a/Late").is_ok());
    }

    #[test]
    fn test_parent_defines_shared_classes() {
        let cache = ClassCache::new();
        let parent = sample_loader();
        let child = MemoryClassLoader::with_parent(parent.clone());
        child.define("b/Leaf", class_bytes("b/Leaf", "a/Child", &[], 0x0021));

        let leaf = cache.resolve(Some(&child), "b/Leaf").unwrap();
        assert_eq!(leaf.loader, Some(child.key()));
        let base = cache.resolve(Some(&child), "a/Base").unwrap();
        assert_eq!(base.loader, Some(parent.key()));
        let again = cache.resolve(Some(&*parent), "a/Base").unwrap();
        assert!(Arc::ptr_eq(&base, &again));
    }

    #[test]
    fn test_supertypes_and_subtyping() {
        let cache = ClassCache::new();
        let loader = sample_loader();
        let child = cache.resolve(Some(&*loader), "a/Child").unwrap();
        assert_eq!(child.supertypes(&cache, Some(&*loader), true), vec!["a/Base"]);
        let all = child.supertypes(&cache, Some(&*loader), false);
        assert_eq!(all, vec!["a/Base", "java/lang/Object", "a/Marker"]);
        assert!(child.is_subtype_of(&cache, Some(&*loader), "a.Marker"));
        assert!(!child.is_subtype_of(&cache, Some(&*loader), "a/Other"));
    }

    #[test]
    fn test_loader_unloaded_drops_entries() {
        let cache = ClassCache::new();
        let loader = sample_loader();
        let first = cache.resolve(Some(&*loader), "a/Child").unwrap();
        cache.loader_unloaded(loader.id(), loader.generation());
        assert_eq!(cache.loader_count(), 0);
        let second = cache.resolve(Some(&*loader), "a/Child").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        let next = loader.next_generation();
        assert_ne!(next.key(), loader.key());
    }

    #[test]
    fn test_common_superclass() {
        let cache = ClassCache::new();
        let loader = sample_loader();
        let hierarchy = CacheHierarchy {
            cache: &cache,
            loader: Some(&*loader),
        };
        assert_eq!(hierarchy.common_superclass("a/Child", "a/Other"), "a/Base");
        assert_eq!(hierarchy.common_superclass("a/Child", "a/Base"), "a/Base");
        assert_eq!(hierarchy.common_superclass("a/Child", "a/Marker"), constants::OBJECT);
        assert_eq!(hierarchy.common_superclass("a/Child", "x/Missing"), constants::OBJECT);
    }
}
