//! Built-in function metadata.
//!
//! The parser only needs enough shape to resolve call sites: which names are
//! native, how many arguments each overload takes, and which trailing
//! arguments are optional (nilable, filled with a default at the call site).

/// Argument type shapes, as far as call-site resolution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeType {
    Int,
    Float,
    Str,
    Any,
    Vector,
    Function,
}

#[derive(Debug, Clone)]
pub struct NativeArg {
    pub name: &'static str,
    pub typ: NativeType,
    /// Optional argument: a missing value becomes a `DefaultVal`.
    pub nilable: bool,
}

#[derive(Debug, Clone)]
pub struct NativeFun {
    pub name: &'static str,
    /// Alternative signatures; the first is primary and drives default
    /// filling.
    pub overloads: Vec<Vec<NativeArg>>,
}

impl NativeFun {
    /// The primary signature.
    #[must_use]
    pub fn args(&self) -> &[NativeArg] {
        &self.overloads[0]
    }
}

#[derive(Debug, Default)]
pub struct NativeRegistry {
    natives: Vec<NativeFun>,
}

impl NativeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard built-in set.
    #[must_use]
    pub fn core() -> Self {
        let mut r = Self::new();
        use NativeType as T;
        r.register("print", &[("x", T::Any, false)]);
        r.register("length", &[("xs", T::Any, false)]);
        r.register("push", &[("xs", T::Vector, false), ("x", T::Any, false)]);
        r.register("pop", &[("xs", T::Vector, false)]);
        r.register("map", &[("xs", T::Vector, false), ("f", T::Function, false)]);
        r.register(
            "filter",
            &[("xs", T::Vector, false), ("f", T::Function, false)],
        );
        r.register("min", &[("a", T::Any, false), ("b", T::Any, false)]);
        r.register("max", &[("a", T::Any, false), ("b", T::Any, false)]);
        r.register("abs", &[("x", T::Any, false)]);
        r.register("assert", &[("cond", T::Any, false)]);
        r.register(
            "substring",
            &[
                ("s", T::Str, false),
                ("start", T::Int, false),
                ("size", T::Int, true),
            ],
        );
        r.register("concat_string", &[("xs", T::Vector, false), ("sep", T::Str, true)]);
        // Conversion builtins share their names with the type keywords.
        r.register("int", &[("x", T::Any, false)]);
        r.register("float", &[("x", T::Any, false)]);
        r.register("string", &[("x", T::Any, false)]);
        r
    }

    /// Register an overload of `name`. Repeated registration of the same
    /// name chains an alternative signature.
    pub fn register(&mut self, name: &'static str, args: &[(&'static str, NativeType, bool)]) {
        let sig: Vec<NativeArg> = args
            .iter()
            .map(|&(name, typ, nilable)| NativeArg { name, typ, nilable })
            .collect();
        if let Some(existing) = self.natives.iter_mut().find(|n| n.name == name) {
            existing.overloads.push(sig);
        } else {
            self.natives.push(NativeFun {
                name,
                overloads: vec![sig],
            });
        }
    }

    #[must_use]
    pub fn find_native(&self, name: &str) -> Option<&NativeFun> {
        self.natives.iter().find(|n| n.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_set_resolves_conversion_builtins() {
        let r = NativeRegistry::core();
        assert!(r.find_native("print").is_some());
        assert!(r.find_native("int").is_some());
        assert!(r.find_native("no_such_native").is_none());
    }

    #[test]
    fn repeated_registration_chains_overloads() {
        let mut r = NativeRegistry::new();
        r.register("f", &[("a", NativeType::Any, false)]);
        r.register("f", &[("a", NativeType::Any, false), ("b", NativeType::Any, false)]);
        assert_eq!(r.find_native("f").unwrap().overloads.len(), 2);
    }
}
