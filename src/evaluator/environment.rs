use crate::Error;
use crate::ast::Value;
use crate::builtinops::Arity;
use crate::evaluator::intooperation::{
    BuiltinFuture, IntoOperation, IntoVariadicOperation, OperationFn, check_arity, resolved,
};
use crate::pattern::match_params;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

/// Per-binding calling convention and redefinition policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefineOptions {
    /// Pass argument expressions to a builtin without evaluating them
    pub skip_evaluate_args: bool,
    /// When false, later `define`s of the same name in the same scope fail
    pub allow_override: bool,
}

impl Default for DefineOptions {
    fn default() -> Self {
        DefineOptions {
            skip_evaluate_args: false,
            allow_override: true,
        }
    }
}

/// One entry in a name's binding list.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub value: Value,
    pub options: DefineOptions,
}

#[derive(Default)]
struct Scope {
    bindings: RefCell<HashMap<String, Vec<Binding>>>,
    parent: Option<Environment>,
}

/// A lexical scope and its chain of parents.
///
/// Cloning an `Environment` clones the handle, not the scope: closures and
/// child scopes share the scope they were created from, and a `define` made
/// through any handle is visible through all of them.
#[derive(Clone, Default)]
pub struct Environment(Rc<Scope>);

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh scope whose parent is this one
    pub fn child(&self) -> Self {
        Environment(Rc::new(Scope {
            bindings: RefCell::default(),
            parent: Some(self.clone()),
        }))
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.0.parent.as_ref()
    }

    /// Append a binding for `name` in this scope.
    ///
    /// Earlier bindings are kept: a name defined several times holds all of its
    /// values, and calls choose between them by argument shape.
    pub fn define(
        &self,
        name: impl Into<String>,
        value: Value,
        options: DefineOptions,
    ) -> Result<(), Error> {
        let name = name.into();
        let mut bindings = self.0.bindings.borrow_mut();
        if let Some(latest) = bindings.get(&name).and_then(|list| list.last())
            && !latest.options.allow_override
        {
            return Err(Error::EvalError(format!(
                "Cannot override existing symbol: {name}"
            )));
        }
        let list = bindings.entry(name).or_default();
        list.push(Binding { value, options });
        Ok(())
    }

    /// Append without the override check; used for parameters of a fresh call scope
    /// and for host registrations.
    pub(crate) fn bind(&self, name: impl Into<String>, value: Value, options: DefineOptions) {
        self.0
            .bindings
            .borrow_mut()
            .entry(name.into())
            .or_default()
            .push(Binding { value, options });
    }

    /// Resolve `name`.
    ///
    /// Without `args`, the most recent binding in the nearest scope that defines
    /// the name wins. With `args`, each closure bound to the name in that scope is
    /// tried in definition order and the first whose formal parameters match the
    /// arguments wins; if none match the most recent binding is used. Scopes that
    /// do not define the name at all defer to their parent.
    pub fn lookup(&self, name: &str, args: Option<&[Value]>) -> Result<Binding, Error> {
        let mut scope = self;
        loop {
            if let Some(found) = scope.lookup_local(name, args) {
                return Ok(found);
            }
            match &scope.0.parent {
                Some(parent) => scope = parent,
                None => return Err(Error::UndefinedSymbol(name.to_owned())),
            }
        }
    }

    fn lookup_local(&self, name: &str, args: Option<&[Value]>) -> Option<Binding> {
        let bindings = self.0.bindings.borrow();
        let list = bindings.get(name)?;

        if let Some(args) = args {
            let matched = list.iter().enumerate().find(|(_, binding)| {
                matches!(&binding.value, Value::Function { params, .. }
                    if match_params(params, args).is_some())
            });
            if let Some((index, binding)) = matched {
                tracing::trace!(name, index, candidates = list.len(), "dispatch matched");
                return Some(binding.clone());
            }
        }

        let latest = list.last()?;
        if args.is_some() && list.len() > 1 {
            tracing::trace!(name, candidates = list.len(), "dispatch fell back to latest");
        }
        Some(latest.clone())
    }

    /// Register a builtin that works directly on the argument slice.
    ///
    /// # Example
    /// ```
    /// use filth::evaluator::create_global_env;
    /// use filth::ast::Value;
    /// use filth::Error;
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Number(args.len() as f64))
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_function("count-args", count_args);
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        let wrapped: Arc<OperationFn> =
            Arc::new(move |_env: &Environment, args: Vec<Value>| resolved(func(&args)));
        self.register(name, wrapped, DefineOptions::default());
    }

    /// Register a strongly-typed Rust function using automatic argument
    /// extraction and result conversion.
    ///
    /// ```rust,ignore
    /// fn hypot(a: f64, b: f64) -> f64 { (a * a + b * b).sqrt() }
    /// env.register_builtin_operation::<_, (f64, f64)>("hypot", hypot);
    /// ```
    ///
    /// Supported parameter types: `f64` (number), `bool`, `&str` (string
    /// literal), `Value` (owned raw argument), and the list iterators
    /// `ValueIter<'_>`, `NumIter<'_>`, `StringIter<'_>` (one list argument).
    ///
    /// Supported return types: any `R: Into<Value>`, or `Result<R, Error>`.
    /// Arity is enforced automatically.
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.register(name, func.into_operation(), DefineOptions::default());
    }

    /// Register a builtin whose last Rust parameter is a rest iterator
    /// (`ValueIter<'_>`, `NumIter<'_>` or `StringIter<'_>`) spanning the
    /// remaining arguments. The total argument count is checked against `arity`.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        let wrapped = check_arity(arity, func.into_variadic_operation());
        self.register(name, wrapped, DefineOptions::default());
    }

    /// Register an asynchronous builtin. The evaluator suspends on the returned
    /// future before evaluating anything else.
    pub fn register_async_builtin<F, Fut>(&self, name: &str, func: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + 'static,
    {
        let wrapped: Arc<OperationFn> = Arc::new(move |_env: &Environment, args: Vec<Value>| {
            Box::pin(func(args)) as BuiltinFuture
        });
        self.register(name, wrapped, DefineOptions::default());
    }

    pub(crate) fn register(&self, name: &str, func: Arc<OperationFn>, options: DefineOptions) {
        self.bind(
            name,
            Value::BuiltinFunction {
                id: name.to_owned(),
                func,
            },
            options,
        );
    }

    /// Every visible name with its most recent binding, sorted by name.
    /// Inner scopes shadow outer ones.
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut visible = match &self.0.parent {
            Some(parent) => parent.get_all_bindings().into_iter().collect(),
            None => HashMap::new(),
        };

        for (name, list) in self.0.bindings.borrow().iter() {
            if let Some(latest) = list.last() {
                visible.insert(name.clone(), latest.value.clone());
            }
        }

        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}
