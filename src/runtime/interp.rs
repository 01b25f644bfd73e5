//! Tree-walking evaluator and built-in globals.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::error::{ScriptError, SourceLocation};
use crate::gc::Gc;

use super::ast::*;
use super::lexer::Span;
use super::value::{CheapClone, JsObject, JsString, NativeFunction, ObjectKind, Value};
use super::{BindingKind, CallInfo, EngineContext, ErrorKind, Isolate, json};

/// A thrown value and the position it was thrown from.
struct Exception {
    value: Value,
    span: Span,
}

type Completion<T> = Result<T, Exception>;

/// Evaluate `program` in `engine`. The caller holds the lock and has entered
/// the context.
pub(crate) fn run(
    engine: &EngineContext,
    program: &Program,
    origin: &str,
) -> Result<Value, ScriptError> {
    let interp = Interpreter {
        isolate: engine.isolate(),
        engine,
        origin,
    };
    interp
        .run_program(program)
        .map_err(|exception| interp.to_script_error(exception))
}

struct Interpreter<'a> {
    isolate: &'a Isolate,
    engine: &'a EngineContext,
    origin: &'a str,
}

impl Interpreter<'_> {
    fn run_program(&self, program: &Program) -> Completion<Value> {
        self.check_redeclarations(program)?;

        let mut completion = Value::Undefined;
        for statement in &program.body {
            match statement {
                Statement::Expression(stmt) => {
                    completion = self.eval(&stmt.expression)?;
                }
                Statement::VariableDeclaration(decl) => self.declare(decl)?,
                Statement::Throw(stmt) => {
                    let value = self.eval(&stmt.argument)?;
                    self.annotate_stack(&value, stmt.span);
                    return Err(Exception {
                        value,
                        span: stmt.span,
                    });
                }
                Statement::Empty => {}
            }
        }
        Ok(completion)
    }

    /// Lexical names may be declared once per context, so the whole script is
    /// rejected before any statement runs.
    fn check_redeclarations(&self, program: &Program) -> Completion<()> {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut vars: FxHashSet<&str> = FxHashSet::default();
        for statement in &program.body {
            let Statement::VariableDeclaration(decl) = statement else {
                continue;
            };
            for declarator in &decl.declarations {
                let name = declarator.id.name.as_str();
                let conflict = match decl.kind {
                    VariableKind::Var => {
                        vars.insert(name);
                        seen.contains(name) || self.engine.binding(name).is_some()
                    }
                    VariableKind::Let | VariableKind::Const => {
                        !seen.insert(name)
                            || vars.contains(name)
                            || self.engine.binding(name).is_some()
                    }
                };
                if conflict {
                    return Err(self.throw(
                        ErrorKind::SyntaxError,
                        &format!("Identifier '{}' has already been declared", name),
                        declarator.id.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn declare(&self, decl: &VariableDeclaration) -> Completion<()> {
        for declarator in &decl.declarations {
            let name = declarator.id.name.cheap_clone();
            let value = match &declarator.init {
                Some(init) => Some(self.eval(init)?),
                None => None,
            };
            match decl.kind {
                VariableKind::Var => {
                    let global = self.engine.global();
                    let exists = self
                        .isolate
                        .with_object(global, |obj| obj.get_own(name.as_str()).is_some())
                        .unwrap_or(false);
                    if value.is_some() || !exists {
                        self.isolate
                            .set_property(global, name, value.unwrap_or_default());
                    }
                }
                VariableKind::Let | VariableKind::Const => {
                    let kind = if decl.kind == VariableKind::Const {
                        BindingKind::Const
                    } else {
                        BindingKind::Let
                    };
                    self.isolate.set_property(
                        self.engine.lexical(),
                        name.clone(),
                        value.unwrap_or_default(),
                    );
                    self.engine.declare(name, kind);
                }
            }
        }
        Ok(())
    }

    // ============ EXPRESSIONS ============

    fn eval(&self, expr: &Expression) -> Completion<Value> {
        match expr {
            Expression::Literal(lit) => Ok(match &lit.value {
                LiteralValue::Null => Value::Null,
                LiteralValue::Boolean(b) => Value::Boolean(*b),
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::String(s) => Value::String(s.cheap_clone()),
            }),
            Expression::Array(arr) => {
                let elements = arr
                    .elements
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Completion<Vec<_>>>()?;
                Ok(Value::Object(self.isolate.alloc(JsObject::array(elements))))
            }
            Expression::Object(obj) => {
                let mut object = JsObject::new();
                for prop in &obj.properties {
                    let value = self.eval(&prop.value)?;
                    object.set(prop.key.cheap_clone(), value);
                }
                Ok(Value::Object(self.isolate.alloc(object)))
            }
            Expression::Identifier(id) => self.lookup(id),
            Expression::Unary(unary) => self.eval_unary(unary),
            Expression::Binary(binary) => {
                let left = self.eval(&binary.left)?;
                let right = self.eval(&binary.right)?;
                Ok(self.binary_op(binary.operator, &left, &right))
            }
            Expression::Logical(logical) => {
                let left = self.eval(&logical.left)?;
                let short_circuit = match logical.operator {
                    LogicalOp::And => !left.to_boolean(),
                    LogicalOp::Or => left.to_boolean(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(&logical.right)
                }
            }
            Expression::Conditional(cond) => {
                if self.eval(&cond.test)?.to_boolean() {
                    self.eval(&cond.consequent)
                } else {
                    self.eval(&cond.alternate)
                }
            }
            Expression::Assignment(assign) => self.eval_assignment(assign),
            Expression::Member(member) => {
                let object = self.eval(&member.object)?;
                let key = self.property_key(&member.property)?;
                self.get_member(&object, &key, member.span)
            }
            Expression::Call(call) | Expression::New(call) => self.eval_call(call),
        }
    }

    fn lookup(&self, id: &Identifier) -> Completion<Value> {
        match self.resolve(id.name.as_str()) {
            Some(value) => Ok(value),
            None => Err(self.throw(
                ErrorKind::ReferenceError,
                &format!("{} is not defined", id.name),
                id.span,
            )),
        }
    }

    fn resolve(&self, name: &str) -> Option<Value> {
        if self.engine.binding(name).is_some() {
            return Some(
                self.isolate
                    .get_property(&Value::Object(self.engine.lexical()), name),
            );
        }
        self.isolate
            .with_object(self.engine.global(), |global| global.get(name))
            .flatten()
    }

    fn eval_unary(&self, unary: &UnaryExpression) -> Completion<Value> {
        if unary.operator == UnaryOp::Typeof {
            // typeof tolerates unresolvable names.
            let value = match unary.argument.as_ref() {
                Expression::Identifier(id) => self.resolve(id.name.as_str()).unwrap_or_default(),
                other => self.eval(other)?,
            };
            let type_name = self.isolate.value_type(&value).type_of();
            return Ok(Value::from(type_name));
        }

        let value = self.eval(&unary.argument)?;
        Ok(match unary.operator {
            UnaryOp::Not => Value::Boolean(!value.to_boolean()),
            UnaryOp::Minus => Value::Number(-self.to_number(&value)),
            UnaryOp::Plus => Value::Number(self.to_number(&value)),
            UnaryOp::Typeof => Value::Undefined,
        })
    }

    fn eval_assignment(&self, assign: &AssignmentExpression) -> Completion<Value> {
        match &assign.target {
            AssignmentTarget::Identifier(id) => {
                match self.engine.binding(id.name.as_str()) {
                    Some(BindingKind::Const) => {
                        return Err(self.throw(
                            ErrorKind::TypeError,
                            "Assignment to constant variable.",
                            assign.span,
                        ));
                    }
                    Some(BindingKind::Let) => {
                        let value = self.eval(&assign.value)?;
                        self.isolate.set_property(
                            self.engine.lexical(),
                            id.name.cheap_clone(),
                            value.cheap_clone(),
                        );
                        return Ok(value);
                    }
                    None => {}
                }
                let value = self.eval(&assign.value)?;
                self.isolate
                    .set_property(self.engine.global(), id.name.cheap_clone(), value.cheap_clone());
                Ok(value)
            }
            AssignmentTarget::Member(member) => {
                let object = self.eval(&member.object)?;
                let key = self.property_key(&member.property)?;
                let value = self.eval(&assign.value)?;
                match &object {
                    Value::Object(gc) => {
                        self.isolate
                            .set_property(*gc, JsString::from(key), value.clone());
                    }
                    Value::Undefined | Value::Null => {
                        return Err(self.throw(
                            ErrorKind::TypeError,
                            &format!(
                                "Cannot set properties of {} (setting '{}')",
                                self.isolate.to_display_string(&object),
                                key
                            ),
                            member.span,
                        ));
                    }
                    // Writes to primitives are silently dropped.
                    _ => {}
                }
                Ok(value)
            }
        }
    }

    fn property_key(&self, property: &MemberProperty) -> Completion<String> {
        match property {
            MemberProperty::Identifier(id) => Ok(id.name.to_string()),
            MemberProperty::Expression(expr) => {
                let key = self.eval(expr)?;
                Ok(self.isolate.to_display_string(&key))
            }
        }
    }

    fn get_member(&self, object: &Value, key: &str, span: Span) -> Completion<Value> {
        if object.is_null_or_undefined() {
            return Err(self.throw(
                ErrorKind::TypeError,
                &format!(
                    "Cannot read properties of {} (reading '{}')",
                    self.isolate.to_display_string(object),
                    key
                ),
                span,
            ));
        }
        Ok(self.isolate.get_property(object, key))
    }

    fn eval_call(&self, call: &CallExpression) -> Completion<Value> {
        let (this, callee) = match call.callee.as_ref() {
            Expression::Member(member) => {
                let object = self.eval(&member.object)?;
                let key = self.property_key(&member.property)?;
                let callee = self.get_member(&object, &key, member.span)?;
                (object, callee)
            }
            other => (Value::Undefined, self.eval(other)?),
        };

        let args = call
            .arguments
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Completion<Vec<_>>>()?;

        let func = callee.as_object().and_then(|gc| {
            self.isolate
                .with_object(gc, |obj| match &obj.kind {
                    ObjectKind::Function(f) => Some(f.func.cheap_clone()),
                    _ => None,
                })
                .flatten()
        });
        let Some(func) = func else {
            return Err(self.throw(
                ErrorKind::TypeError,
                &format!("{} is not a function", describe_callee(&call.callee)),
                call.span,
            ));
        };

        let info = CallInfo {
            isolate: self.isolate,
            context: self.engine,
            this,
            args: &args,
        };
        (*func)(&info).map_err(|value| {
            self.annotate_stack(&value, call.span);
            Exception {
                value,
                span: call.span,
            }
        })
    }

    // ============ OPERATORS ============

    fn binary_op(&self, op: BinaryOp, left: &Value, right: &Value) -> Value {
        match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left);
                let right = self.to_primitive(right);
                if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    let mut text = self.isolate.to_display_string(&left);
                    text.push_str(&self.isolate.to_display_string(&right));
                    Value::from(text)
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(self.to_number(left) - self.to_number(right)),
            BinaryOp::Mul => Value::Number(self.to_number(left) * self.to_number(right)),
            BinaryOp::Div => Value::Number(self.to_number(left) / self.to_number(right)),
            BinaryOp::Mod => Value::Number(self.to_number(left) % self.to_number(right)),
            BinaryOp::StrictEq => Value::Boolean(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Boolean(!left.strict_equals(right)),
            BinaryOp::Eq => Value::Boolean(self.loose_equals(left, right)),
            BinaryOp::NotEq => Value::Boolean(!self.loose_equals(left, right)),
            BinaryOp::Lt => Value::Boolean(self.compare(left, right) == Some(Ordering::Less)),
            BinaryOp::Gt => Value::Boolean(self.compare(left, right) == Some(Ordering::Greater)),
            BinaryOp::LtEq => Value::Boolean(matches!(
                self.compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::GtEq => Value::Boolean(matches!(
                self.compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            )),
        }
    }

    /// Objects convert to their display string.
    fn to_primitive(&self, value: &Value) -> Value {
        match value {
            Value::Object(_) => Value::from(self.isolate.to_display_string(value)),
            other => other.clone(),
        }
    }

    fn to_number(&self, value: &Value) -> f64 {
        self.to_primitive(value).to_number()
    }

    fn compare(&self, left: &Value, right: &Value) -> Option<Ordering> {
        let left = self.to_primitive(left);
        let right = self.to_primitive(right);
        match (&left, &right) {
            (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
            _ => left.to_number().partial_cmp(&right.to_number()),
        }
    }

    fn loose_equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Object(_), Value::Object(_)) => left.strict_equals(right),
            (Value::Object(_), _) => self.loose_equals(&self.to_primitive(left), right),
            (_, Value::Object(_)) => self.loose_equals(left, &self.to_primitive(right)),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            _ => left.to_number() == right.to_number(),
        }
    }

    // ============ ERRORS ============

    fn throw(&self, kind: ErrorKind, message: &str, span: Span) -> Exception {
        let value = self.isolate.new_error(kind, message);
        self.annotate_stack(&value, span);
        Exception { value, span }
    }

    /// Append the throw position to an error object's stack, once.
    fn annotate_stack(&self, value: &Value, span: Span) {
        let Some(gc) = value.as_object() else {
            return;
        };
        let frame = format!("\n    at {}:{}:{}", self.origin, span.line, span.column);
        self.isolate.with_object_mut(gc, |obj| {
            if !matches!(obj.kind, ObjectKind::Error) {
                return;
            }
            let stack = match obj.get_own("stack") {
                Some(Value::String(s)) if s.as_str().contains("\n    at ") => return,
                Some(Value::String(s)) => format!("{}{}", s, frame),
                _ => return,
            };
            obj.set(JsString::from("stack"), Value::from(stack));
        });
    }

    fn to_script_error(&self, exception: Exception) -> ScriptError {
        let location = SourceLocation {
            origin: self.origin.to_string(),
            line: exception.span.line,
            column: exception.span.column,
        };
        let message = self.isolate.to_display_string(&exception.value);
        let stack = exception.value.as_object().and_then(|gc| {
            self.isolate
                .with_object(gc, |obj| match (&obj.kind, obj.get_own("stack")) {
                    (ObjectKind::Error, Some(Value::String(s))) => Some(s.to_string()),
                    _ => None,
                })
                .flatten()
        });
        let error = ScriptError::new(message).with_location(location);
        match stack {
            Some(stack) => error.with_stack(stack),
            None => error,
        }
    }
}

fn describe_callee(expr: &Expression) -> String {
    match expr {
        Expression::Identifier(id) => id.name.to_string(),
        Expression::Member(member) => match &member.property {
            MemberProperty::Identifier(id) => {
                format!("{}.{}", describe_callee(&member.object), id.name)
            }
            MemberProperty::Expression(_) => format!("{}[...]", describe_callee(&member.object)),
        },
        _ => "expression".to_string(),
    }
}

// ============ BUILT-IN GLOBALS ============

fn native<F>(isolate: &Isolate, name: &str, func: F) -> Value
where
    F: Fn(&CallInfo<'_>) -> Result<Value, Value> + 'static,
{
    Value::Object(isolate.alloc(JsObject::function(NativeFunction {
        name: JsString::from(name),
        func: std::rc::Rc::new(func),
    })))
}

/// Populate a fresh global object.
pub(crate) fn install_globals(isolate: &Isolate, global: Gc) {
    let mut entries: Vec<(&str, Value)> = vec![
        ("globalThis", Value::Object(global)),
        ("undefined", Value::Undefined),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ];

    for kind in ErrorKind::ALL {
        let constructor = native(isolate, kind.name(), move |info| {
            let message = match info.arg(0) {
                Value::Undefined => String::new(),
                other => info.isolate.to_display_string(&other),
            };
            Ok(info.isolate.new_error(kind, &message))
        });
        entries.push((kind.name(), constructor));
    }

    let parse = native(isolate, "parse", |info| {
        let text = info.isolate.to_display_string(&info.arg(0));
        json::parse(info.isolate, &text)
            .map_err(|message| info.error(ErrorKind::SyntaxError, &message))
    });
    let stringify = native(isolate, "stringify", |info| {
        match json::stringify(info.isolate, &info.arg(0)) {
            Ok(Some(text)) => Ok(Value::from(text)),
            Ok(None) => Ok(Value::Undefined),
            Err(message) => Err(info.error(ErrorKind::TypeError, &message)),
        }
    });
    let mut json_object = JsObject::new();
    json_object.set(JsString::from("parse"), parse);
    json_object.set(JsString::from("stringify"), stringify);
    entries.push(("JSON", Value::Object(isolate.alloc(json_object))));

    for (name, value) in entries {
        isolate.set_property(global, JsString::from(name), value);
    }
}
