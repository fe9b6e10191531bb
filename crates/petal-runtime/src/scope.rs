use std::collections::BTreeMap;

use petal_core::TplValue;

/// Layered variable bindings. Lookup precedence, innermost first:
/// local frames, globals, render-time keyword arguments, built-ins.
/// The flattened view is ordered and dict-like so user expressions can
/// enumerate it.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    builtins: BTreeMap<String, TplValue>,
    args: BTreeMap<String, TplValue>,
    globals: BTreeMap<String, TplValue>,
    frames: Vec<BTreeMap<String, TplValue>>,
}

impl ScopeStack {
    pub fn new(
        extra_builtins: &BTreeMap<String, TplValue>,
        args: BTreeMap<String, TplValue>,
        base: BTreeMap<String, TplValue>,
    ) -> Self {
        let mut builtins = extra_builtins.clone();
        builtins.insert("None".to_string(), TplValue::None);
        builtins.insert("True".to_string(), TplValue::Bool(true));
        builtins.insert("False".to_string(), TplValue::Bool(false));
        builtins.insert("default".to_string(), TplValue::Default);
        // Internal alias used by rewritten expression code.
        builtins.insert("__default".to_string(), TplValue::Default);
        Self {
            builtins,
            args,
            globals: BTreeMap::new(),
            frames: vec![base],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(BTreeMap::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<&TplValue> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value);
            }
        }
        self.globals
            .get(name)
            .or_else(|| self.args.get(name))
            .or_else(|| self.builtins.get(name))
    }

    pub fn set_local(&mut self, name: &str, value: TplValue) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    pub fn set_global(&mut self, name: &str, value: TplValue) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn remove_local(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.remove(name);
        }
    }

    /// Write back into the owning frame; false when the name is not a
    /// local or global binding.
    pub fn assign_existing(&mut self, name: &str, value: TplValue) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if frame.contains_key(name) {
                frame.insert(name.to_string(), value);
                return true;
            }
        }
        if self.globals.contains_key(name) {
            self.globals.insert(name.to_string(), value);
            return true;
        }
        false
    }

    /// Ordered flattened view with inner layers winning, used both to
    /// seed expression evaluation and for error snapshots.
    pub fn flatten(&self) -> BTreeMap<String, TplValue> {
        let mut out = self.builtins.clone();
        for (name, value) in &self.args {
            out.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.globals {
            out.insert(name.clone(), value.clone());
        }
        for frame in &self.frames {
            for (name, value) in frame {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ScopeStack {
        ScopeStack::new(&BTreeMap::new(), BTreeMap::new(), BTreeMap::new())
    }

    #[test]
    fn builtin_layer_is_always_present() {
        let scope = scope();
        assert_eq!(scope.lookup("None"), Some(&TplValue::None));
        assert_eq!(scope.lookup("True"), Some(&TplValue::Bool(true)));
        assert_eq!(scope.lookup("default"), Some(&TplValue::Default));
    }

    #[test]
    fn keyword_arguments_shadow_builtins_but_not_locals() {
        let mut args = BTreeMap::new();
        args.insert("True".to_string(), TplValue::Str("arg".to_string()));
        args.insert("x".to_string(), TplValue::Int(1));
        let mut scope = ScopeStack::new(&BTreeMap::new(), args, BTreeMap::new());
        assert_eq!(scope.lookup("True"), Some(&TplValue::Str("arg".to_string())));

        scope.push_frame();
        scope.set_local("x", TplValue::Int(2));
        assert_eq!(scope.lookup("x"), Some(&TplValue::Int(2)));
        scope.pop_frame();
        assert_eq!(scope.lookup("x"), Some(&TplValue::Int(1)));
    }

    #[test]
    fn globals_survive_frame_pops() {
        let mut scope = scope();
        scope.push_frame();
        scope.set_global("g", TplValue::Int(7));
        scope.set_local("l", TplValue::Int(8));
        scope.pop_frame();
        assert_eq!(scope.lookup("g"), Some(&TplValue::Int(7)));
        assert_eq!(scope.lookup("l"), None);
    }

    #[test]
    fn assignment_targets_the_owning_frame() {
        let mut scope = scope();
        scope.set_local("x", TplValue::Int(1));
        scope.push_frame();
        assert!(scope.assign_existing("x", TplValue::Int(5)));
        scope.pop_frame();
        assert_eq!(scope.lookup("x"), Some(&TplValue::Int(5)));
        assert!(!scope.assign_existing("unknown", TplValue::Int(0)));
    }

    #[test]
    fn flattened_view_orders_inner_layers_last() {
        let mut scope = scope();
        scope.set_local("x", TplValue::Int(1));
        scope.push_frame();
        scope.set_local("x", TplValue::Int(2));
        let flat = scope.flatten();
        assert_eq!(flat.get("x"), Some(&TplValue::Int(2)));
        assert!(flat.contains_key("None"));
    }
}
