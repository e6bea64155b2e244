//! Class lookup and cross references for one loaded instance.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;

use crate::model::{ClassDef, CodeRef, MemberRef, MethodDef};

#[derive(Debug, Default)]
pub struct ClassIndex {
    classes: Vec<Arc<ClassDef>>,
    /// Binary name (`a.Outer$Inner`) and source name (`a.Outer.Inner`) to slot.
    by_name: HashMap<String, usize>,
    method_callers: HashMap<String, BTreeSet<String>>,
    class_users: HashMap<String, BTreeSet<String>>,
    /// Direct subtypes, by supertype name.
    subtypes: HashMap<String, BTreeSet<String>>,
}

/// References contributed by one class.
#[derive(Default)]
struct ClassRefs {
    calls: Vec<(MemberRef, String)>,
    uses: Vec<(String, String)>,
}

fn collect_refs(class: &ClassDef) -> ClassRefs {
    let mut refs = ClassRefs::default();
    for method in &class.methods {
        let Some(body) = &method.body else { continue };
        let caller = method.display();
        let mut seen_types: HashSet<String> = HashSet::new();
        for reference in body.references() {
            if let CodeRef::Method(m) = &reference {
                refs.calls.push((m.clone(), caller.clone()));
            }
            if let Some(target) = reference.referenced_class()
                && target != class.name
                && seen_types.insert(target.clone())
            {
                refs.uses.push((target, caller.clone()));
            }
        }
    }
    for parent in class.super_class_name().into_iter().chain(class.interface_names()) {
        if parent != class.name {
            refs.uses.push((parent, class.name.clone()));
        }
    }
    refs
}

impl ClassIndex {
    pub fn build(classes: Vec<ClassDef>) -> Self {
        let mut index = ClassIndex::default();
        for class in classes {
            if index.by_name.contains_key(&class.name) {
                warn!("Duplicate class {}, keeping the first definition", class.name);
                continue;
            }
            let slot = index.classes.len();
            index.by_name.insert(class.name.clone(), slot);
            index.classes.push(Arc::new(class));
        }
        // Source-form aliases for nested classes, never shadowing a binary name.
        for (slot, class) in index.classes.iter().enumerate() {
            let source = class.name.replace('$', ".");
            if source != class.name {
                index.by_name.entry(source).or_insert(slot);
            }
        }

        let per_class: Vec<ClassRefs> = index.classes.par_iter().map(|c| collect_refs(c)).collect();
        let mut resolved: HashMap<MemberRef, Option<String>> = HashMap::new();
        for refs in per_class {
            for (callee, caller) in refs.calls {
                let key = resolved
                    .entry(callee)
                    .or_insert_with_key(|m| index.resolve_call(m))
                    .clone();
                if let Some(key) = key {
                    index.method_callers.entry(key).or_default().insert(caller);
                }
            }
            for (target, user) in refs.uses {
                index.class_users.entry(target).or_default().insert(user);
            }
        }

        for class in &index.classes {
            for parent in class.super_class_name().into_iter().chain(class.interface_names()) {
                index
                    .subtypes
                    .entry(parent)
                    .or_default()
                    .insert(class.name.clone());
            }
        }

        debug!(
            "Indexed {} classes, {} called methods, {} used classes",
            index.classes.len(),
            index.method_callers.len(),
            index.class_users.len()
        );
        index
    }

    /// Display form of the method a call lands on: the first loaded class on
    /// the receiver's supertype chain that declares it, else the call as written.
    fn resolve_call(&self, call: &MemberRef) -> Option<String> {
        let written = call.method_key()?;
        let Some(receiver) = call.owner_class() else {
            return Some(written);
        };
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([receiver]);
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(class) = self.class(&name) else { continue };
            if let Some(declared) = class
                .methods
                .iter()
                .find(|m| m.name == call.name && m.descriptor == call.descriptor)
            {
                return Some(declared.display());
            }
            queue.extend(self.supertypes(class));
        }
        Some(written)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[Arc<ClassDef>] {
        &self.classes
    }

    pub fn class(&self, name: &str) -> Option<&Arc<ClassDef>> {
        self.by_name.get(name).map(|slot| &self.classes[*slot])
    }

    pub fn method(&self, class: &str, method: &str) -> Option<(&Arc<ClassDef>, &MethodDef)> {
        let class = self.class(class)?;
        let method = class.find_method(method)?;
        Some((class, method))
    }

    /// Callers of a method, `None` when the method is not loaded.
    pub fn method_callers(&self, class: &str, method: &str) -> Option<Vec<String>> {
        let (_, found) = self.method(class, method)?;
        Some(
            self.method_callers
                .get(&found.display())
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Methods and classes that use a class, `None` when the class is not loaded.
    pub fn class_users(&self, class: &str) -> Option<Vec<String>> {
        let found = self.class(class)?;
        Some(
            self.class_users
                .get(&found.name)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Classes declared directly inside `class` (inner, local and anonymous).
    pub fn nested_classes(&self, class: &ClassDef) -> Vec<&Arc<ClassDef>> {
        let prefix = format!("{}$", class.name);
        let mut nested: Vec<&Arc<ClassDef>> = self
            .classes
            .iter()
            .filter(|c| {
                c.name
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('$'))
            })
            .collect();
        nested.sort_by(|a, b| a.name.cmp(&b.name));
        nested
    }

    pub fn is_nested(&self, class: &ClassDef) -> bool {
        class
            .name
            .rsplit_once('$')
            .is_some_and(|(outer, _)| self.by_name.contains_key(outer))
    }

    fn supertypes(&self, class: &ClassDef) -> Vec<String> {
        class
            .super_class_name()
            .into_iter()
            .chain(class.interface_names())
            .collect()
    }

    /// Methods with the same name and descriptor in loaded ancestors, in
    /// descendants of the declaring class, and in other implementations of
    /// any ancestor that declares it. `None` when the method is not loaded.
    pub fn overrides(&self, class: &str, method: &str) -> Option<Vec<String>> {
        let (owner, target) = self.method(class, method)?;
        if target.is_direct() {
            return Some(Vec::new());
        }
        let declared_in = |c: &ClassDef| {
            c.methods
                .iter()
                .find(|m| m.name == target.name && m.descriptor == target.descriptor && !m.is_direct())
                .map(MethodDef::display)
        };

        let mut related: BTreeSet<String> = BTreeSet::new();
        let mut roots: Vec<String> = vec![owner.name.clone()];
        let mut visited: HashSet<String> = HashSet::from([owner.name.clone()]);
        let mut queue: VecDeque<String> = self.supertypes(owner).into();
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(ancestor) = self.class(&name) {
                if let Some(found) = declared_in(ancestor.as_ref()) {
                    related.insert(found);
                    roots.push(ancestor.name.clone());
                }
                queue.extend(self.supertypes(ancestor));
            }
        }

        // Descendants share one visited set so each class is scanned once.
        let mut seen: HashSet<String> = HashSet::from([owner.name.clone()]);
        let mut queue: VecDeque<String> = roots
            .iter()
            .filter_map(|root| self.subtypes.get(root))
            .flat_map(|children| children.iter().cloned())
            .collect();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(descendant) = self.class(&name)
                && let Some(found) = declared_in(descendant.as_ref())
            {
                related.insert(found);
            }
            if let Some(children) = self.subtypes.get(&name) {
                queue.extend(children.iter().cloned());
            }
        }

        Some(related.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessFlags;

    fn class(desc: &str, super_desc: Option<&str>, interfaces: &[&str], methods: &[(&str, &str, u32)]) -> ClassDef {
        let mut c = ClassDef::new(desc.to_string(), AccessFlags(AccessFlags::PUBLIC)).unwrap();
        c.super_class = super_desc.map(str::to_string);
        c.interfaces = interfaces.iter().map(|s| s.to_string()).collect();
        for (name, descriptor, flags) in methods {
            let m = MethodDef::new(&c.name, name.to_string(), descriptor.to_string(), AccessFlags(*flags), None)
                .unwrap();
            c.methods.push(m);
        }
        c
    }

    fn hierarchy() -> ClassIndex {
        let public = AccessFlags::PUBLIC;
        ClassIndex::build(vec![
            class("La/Base;", Some("Ljava/lang/Object;"), &["La/Runner;"], &[("run", "()V", public), ("<init>", "()V", public)]),
            class("La/Runner;", None, &[], &[("run", "()V", public | AccessFlags::ABSTRACT)]),
            class("La/Child;", Some("La/Base;"), &[], &[("run", "()V", public), ("helper", "()V", AccessFlags::PRIVATE)]),
            class("La/Child$Inner;", Some("Ljava/lang/Object;"), &[], &[]),
            class("La/Base;", None, &[], &[]),
        ])
    }

    #[test]
    fn duplicates_keep_first_definition() {
        let index = hierarchy();
        assert_eq!(index.len(), 4);
        assert_eq!(index.class("a.Base").unwrap().super_class.as_deref(), Some("Ljava/lang/Object;"));
    }

    #[test]
    fn nested_classes_are_found_by_either_name() {
        let index = hierarchy();
        assert!(index.class("a.Child$Inner").is_some());
        assert!(index.class("a.Child.Inner").is_some());
        let child = index.class("a.Child").unwrap();
        let nested = index.nested_classes(child);
        assert_eq!(nested.len(), 1);
        assert!(index.is_nested(nested[0]));
    }

    #[test]
    fn overrides_walk_both_directions_and_skip_self() {
        let index = hierarchy();
        assert_eq!(
            index.overrides("a.Base", "a.Base.run():void").unwrap(),
            vec!["a.Child.run():void", "a.Runner.run():void"]
        );
        assert_eq!(
            index.overrides("a.Runner", "a.Runner.run():void").unwrap(),
            vec!["a.Base.run():void", "a.Child.run():void"]
        );
        assert!(index.overrides("a.Base", "a.Base.<init>():void").unwrap().is_empty());
        assert!(index.overrides("a.Child", "a.Child.helper():void").unwrap().is_empty());
        assert!(index.overrides("a.Child", "a.Child.missing():void").is_none());
    }

    #[test]
    fn overrides_include_other_implementations_of_an_interface() {
        let public = AccessFlags::PUBLIC;
        let index = ClassIndex::build(vec![
            class("La/Runner;", None, &[], &[("run", "()V", public | AccessFlags::ABSTRACT)]),
            class("La/One;", Some("Ljava/lang/Object;"), &["La/Runner;"], &[("run", "()V", public)]),
            class("La/Two;", Some("Ljava/lang/Object;"), &["La/Runner;"], &[("run", "()V", public)]),
            class("La/Three;", Some("Ljava/lang/Object;"), &["La/Runner;"], &[]),
        ]);
        assert_eq!(
            index.overrides("a.One", "a.One.run():void").unwrap(),
            vec!["a.Runner.run():void", "a.Two.run():void"]
        );
        assert_eq!(
            index.overrides("a.Runner", "a.Runner.run():void").unwrap(),
            vec!["a.One.run():void", "a.Two.run():void"]
        );
    }

    #[test]
    fn calls_resolve_to_the_declaring_supertype() {
        let index = hierarchy();
        let call = |owner: &str, name: &str| MemberRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: "()V".to_string(),
        };
        assert_eq!(index.resolve_call(&call("La/Child$Inner;", "run")).as_deref(), Some("a.Child$Inner.run():void"));
        assert_eq!(index.resolve_call(&call("La/Child;", "run")).as_deref(), Some("a.Child.run():void"));
        assert_eq!(index.resolve_call(&call("Ljava/lang/Thread;", "run")).as_deref(), Some("java.lang.Thread.run():void"));
    }

    #[test]
    fn subclasses_count_as_class_users() {
        let index = hierarchy();
        assert_eq!(index.class_users("a.Base").unwrap(), vec!["a.Child"]);
        assert_eq!(index.class_users("a.Runner").unwrap(), vec!["a.Base"]);
        assert!(index.class_users("a.Missing").is_none());
    }

    #[test]
    fn methods_without_callers_return_empty_list() {
        let index = hierarchy();
        assert_eq!(index.method_callers("a.Child", "a.Child.run():void"), Some(Vec::new()));
        assert_eq!(index.method_callers("a.Child", "a.Child.nope():void"), None);
    }
}
