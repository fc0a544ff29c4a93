use std::cell::RefCell;
use std::rc::Rc;

use super::*;

type Log = Rc<RefCell<Vec<String>>>;

/// Manager that records every hook it sees and renders a fixed layout.
struct Scripted {
    log: Log,
    layout: Program,
    tag: Option<Tag>,
    fail: Option<&'static str>,
    stirs: Option<(MutableCell<Value>, Value)>,
}

struct ScriptedData {
    label: String,
    self_ref: PathRef,
}

impl Scripted {
    fn new(log: &Log, layout: Program) -> Self {
        Self {
            log: Rc::clone(log),
            layout,
            tag: None,
            fail: None,
            stirs: None,
        }
    }

    /// Writes `value` into `cell` from inside `create`.
    fn stirring(mut self, cell: &MutableCell<Value>, value: &str) -> Self {
        self.stirs = Some((cell.clone(), Value::from(value)));
        self
    }

    fn tracking(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    fn failing(mut self, hook: &'static str) -> Self {
        self.fail = Some(hook);
        self
    }

    fn record(&self, hook: &'static str, label: &str) -> anyhow::Result<()> {
        self.log.borrow_mut().push(format!("{hook}:{label}"));
        if self.fail == Some(hook) {
            anyhow::bail!("{hook} refused for {label}");
        }
        Ok(())
    }

    fn label(instance: &ComponentInstance) -> anyhow::Result<String> {
        Ok(instance.downcast::<ScriptedData>()?.label.clone())
    }
}

impl ComponentManager for Scripted {
    fn create(
        &self,
        definition: &ComponentDefinition,
        args: &Arguments,
        dynamic_scope: &DynamicScope,
        caller: &PathRef,
        has_default_block: bool,
    ) -> anyhow::Result<ComponentInstance> {
        let label = definition.name().to_owned();
        self.record("create", &label)?;
        if has_default_block {
            self.record("default_block", &label)?;
        }
        if let Some((cell, value)) = &self.stirs {
            cell.set(value.clone())?;
        }
        let self_ref = args
            .names()
            .fold(RecordReference::new(), |record, name| {
                record.field(name, args.get(name))
            })
            .field("theme", dynamic_scope.get("theme"))
            .field("caller", Rc::clone(caller))
            .into_ref();
        Ok(ComponentInstance::new(ScriptedData { label, self_ref }))
    }

    fn get_self(&self, instance: &ComponentInstance) -> anyhow::Result<PathRef> {
        Ok(Rc::clone(&instance.downcast::<ScriptedData>()?.self_ref))
    }

    fn layout_for(
        &self,
        _definition: &ComponentDefinition,
        _instance: &ComponentInstance,
    ) -> anyhow::Result<Program> {
        Ok(self.layout.clone())
    }

    fn did_create_element(
        &self,
        instance: &ComponentInstance,
        _element: NodeId,
        operations: &mut ElementOperations,
    ) -> anyhow::Result<()> {
        let label = Self::label(instance)?;
        self.record("did_create_element", &label)?;
        operations.set_static("data-component", label.as_str());
        Ok(())
    }

    fn did_render_layout(
        &self,
        instance: &ComponentInstance,
        _bounds: &Bounds,
    ) -> anyhow::Result<()> {
        self.record("did_render_layout", &Self::label(instance)?)
    }

    fn did_update_layout(
        &self,
        instance: &ComponentInstance,
        _bounds: &Bounds,
    ) -> anyhow::Result<()> {
        self.record("did_update_layout", &Self::label(instance)?)
    }

    fn get_tag(&self, _instance: &ComponentInstance) -> Option<Tag> {
        self.tag.clone()
    }

    fn update(
        &self,
        instance: &ComponentInstance,
        _dynamic_scope: &DynamicScope,
    ) -> anyhow::Result<()> {
        self.record("update", &Self::label(instance)?)
    }

    fn get_destructor(&self, instance: &ComponentInstance) -> Option<Box<dyn Destructor>> {
        let log = Rc::clone(&self.log);
        let label = Self::label(instance).ok()?;
        Some(Box::new(move || log.borrow_mut().push(format!("destroy:{label}"))))
    }
}

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

fn layout(emit: impl FnOnce(&mut ProgramBuilder)) -> Program {
    let mut builder = ProgramBuilder::new();
    emit(&mut builder);
    builder.build()
}

fn show_name() -> Program {
    layout(|b| {
        b.self_path(&["name"]).append_text();
    })
}

fn define(name: &str, manager: Scripted) -> ComponentDefinition {
    ComponentDefinition::new(name, Rc::new(manager))
}

const NAMED: InvocationArgs<'static> = InvocationArgs {
    positional: 0,
    named: &["name"],
    has_default_block: false,
};

/// Invokes `definition` with `name` bound to the caller's `self.name`.
fn greet(builder: &mut ProgramBuilder, definition: &ComponentDefinition, wrapper: Option<&str>) {
    builder.invoke_component(definition, wrapper, NAMED, |b| {
        b.self_path(&["name"]);
    });
}

fn caller(name: &MutableCell<Value>) -> PathRef {
    RecordReference::new()
        .field("name", name.reference())
        .field("title", constant("Dr."))
        .into_ref()
}

#[test]
fn wrapped_component_runs_its_hooks_in_order() {
    let log = log();
    let greeter = define("greeter", Scripted::new(&log, show_name()));
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| greet(b, &greeter, Some("section")));

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();

    assert_eq!(
        renderer.env().render_html(),
        r#"<section data-component="greeter">Ada</section>"#
    );
    assert_eq!(
        entries(&log),
        vec![
            "create:greeter",
            "did_create_element:greeter",
            "did_render_layout:greeter"
        ]
    );
    assert_eq!(
        result.updates().dump(),
        "#3 CacheGroup then:DidUpdateLayout\n\
         \x20 #1 UpdateComponent component=greeter\n\
         \x20 #2 UpdateText node=2\n"
    );
    let instance = result.instances().next().unwrap().id();
    assert_eq!(
        renderer.env().notifications(),
        &[Notification::DidCreate(instance)]
    );
}

#[test]
fn argument_changes_rerun_update_and_notify() {
    let log = log();
    let greeter = define("greeter", Scripted::new(&log, show_name()));
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| greet(b, &greeter, None));

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    renderer.env_mut().clear_notifications();
    log.borrow_mut().clear();

    name.set(Value::from("Grace")).unwrap();
    let report = renderer.revalidate(&result).unwrap();
    assert_eq!(renderer.env().render_html(), "Grace");
    assert_eq!(
        report,
        RevalidationReport {
            evaluated: 2,
            skipped: 0,
            groups_entered: 1,
            notifications: 1,
        }
    );
    assert_eq!(
        entries(&log),
        vec!["update:greeter", "did_update_layout:greeter"]
    );
    let instance = result.instances().next().unwrap().id();
    assert_eq!(
        renderer.env().notifications(),
        &[Notification::DidUpdate(instance)]
    );

    log.borrow_mut().clear();
    let idle = renderer.revalidate(&result).unwrap();
    assert_eq!(idle.evaluated, 0);
    assert_eq!(idle.skipped, 1);
    assert!(entries(&log).is_empty());
}

#[test]
fn manager_tag_reruns_update_without_argument_changes() {
    let log = log();
    let internal = MutableCell::new(0_i64);
    let counter = define(
        "counter",
        Scripted::new(&log, layout(|b| {
            b.text("static");
        }))
        .tracking(internal.tag()),
    );
    let program = layout(|b| {
        b.invoke_component(&counter, None, InvocationArgs::default(), |_| {});
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, undefined())
        .unwrap();
    log.borrow_mut().clear();

    assert_eq!(renderer.revalidate(&result).unwrap().evaluated, 0);

    internal.update(|count| *count += 1).unwrap();
    let report = renderer.revalidate(&result).unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.notifications, 1);
    assert_eq!(
        entries(&log),
        vec!["update:counter", "did_update_layout:counter"]
    );
}

#[test]
fn constant_components_are_never_revisited() {
    let log = log();
    let badge = define("badge", Scripted::new(&log, show_name()));
    let program = layout(|b| {
        b.invoke_component(&badge, None, NAMED, |b| {
            b.push_constant("fixed");
        });
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, undefined())
        .unwrap();
    assert_eq!(renderer.env().render_html(), "fixed");

    revision::bump();
    let report = renderer.revalidate(&result).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.groups_entered, 0);
}

#[test]
fn dynamic_scope_reaches_nested_components() {
    let log = log();
    let themed = define(
        "themed",
        Scripted::new(&log, layout(|b| {
            b.self_path(&["theme"]).append_text();
        })),
    );
    let program = layout(|b| {
        b.push_constant("dark").bind_dynamic_scope(&["theme"]);
        b.invoke_component(&themed, None, InvocationArgs::default(), |_| {});
        b.pop_dynamic_scope();
        b.invoke_component(&themed, None, InvocationArgs::default(), |_| {});
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    renderer
        .render(MemoryHost::ROOT, &program, undefined())
        .unwrap();
    assert_eq!(renderer.env().render_html(), "dark");
}

#[test]
fn components_see_their_caller_and_default_block() {
    let log = log();
    let titled = define(
        "titled",
        Scripted::new(&log, layout(|b| {
            b.self_path(&["caller", "title"])
                .append_text()
                .text(" ")
                .self_path(&["name"])
                .append_text();
        })),
    );
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| {
        let args = InvocationArgs {
            has_default_block: true,
            ..NAMED
        };
        b.invoke_component(&titled, None, args, |b| {
            b.self_path(&["name"]);
        });
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    assert_eq!(renderer.env().render_html(), "Dr. Ada");
    assert_eq!(
        entries(&log)[..2],
        ["create:titled", "default_block:titled"]
    );
}

#[test]
fn destroy_runs_destructors_in_reverse() {
    let log = log();
    let first = define("first", Scripted::new(&log, show_name()));
    let second = define("second", Scripted::new(&log, show_name()));
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| {
        greet(b, &first, Some("div"));
        greet(b, &second, Some("div"));
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    let instances: Vec<ComponentInstance> = result.instances().cloned().collect();
    log.borrow_mut().clear();

    renderer.destroy(result).unwrap();
    assert_eq!(entries(&log), vec!["destroy:second", "destroy:first"]);
    assert!(instances.iter().all(ComponentInstance::is_destroyed));
    assert_eq!(renderer.env().render_html(), "");
    assert!(matches!(
        instances[0].downcast::<ScriptedData>(),
        Err(LifecycleViolationError::UseAfterDestroy { .. })
    ));
}

#[test]
fn updating_a_destroyed_instance_fails() {
    let log = log();
    let greeter = define("greeter", Scripted::new(&log, show_name()));
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| greet(b, &greeter, None));

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    result.instances().for_each(ComponentInstance::mark_destroyed);

    name.set(Value::from("Grace")).unwrap();
    let error = renderer.revalidate(&result).unwrap_err();
    assert!(matches!(
        error,
        VmError::Lifecycle(LifecycleViolationError::UseAfterDestroy { .. })
    ));
}

#[test]
fn manager_failures_abort_the_pass() {
    let log = log();
    let broken = define("broken", Scripted::new(&log, show_name()).failing("create"));
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| greet(b, &broken, None));

    let mut renderer = Renderer::new(MemoryHost::new());
    let error = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .err()
        .unwrap();
    assert!(matches!(error, VmError::ManagerFailure { hook: "create", .. }));
    assert!(error.to_string().contains("refused for broken"));
    assert!(renderer.env().notifications().is_empty());

    let sulky = define("sulky", Scripted::new(&log, show_name()).failing("update"));
    let program = layout(|b| greet(b, &sulky, None));
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    name.set(Value::from("Grace")).unwrap();
    let error = renderer.revalidate(&result).unwrap_err();
    assert!(matches!(error, VmError::ManagerFailure { hook: "update", .. }));
}

#[test]
fn dynamic_definitions_must_keep_their_identity() {
    let log = log();
    let first = define("first", Scripted::new(&log, show_name()));
    let second = define("second", Scripted::new(&log, show_name()));
    let current = MutableCell::new(first.clone());
    let name = MutableCell::new(Value::from("Ada"));
    let program = layout(|b| {
        b.invoke_dynamic_component(current.reference(), None, NAMED, |b| {
            b.self_path(&["name"]);
        });
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    assert_eq!(result.updates().kinds(), vec!["AssertDefinition", "CacheGroup"]);
    assert!(result
        .updates()
        .dump()
        .starts_with("#1 AssertDefinition expected=first\n"));

    current.set(first.clone()).unwrap();
    renderer.revalidate(&result).unwrap();

    current.set(second).unwrap();
    for _ in 0..2 {
        let error = renderer.revalidate(&result).unwrap_err();
        match error {
            VmError::Lifecycle(LifecycleViolationError::DefinitionChanged { expected, found }) => {
                assert_eq!(expected, "first");
                assert_eq!(found, "second");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert!(!entries(&log).contains(&"update:first".to_owned()));

    current.set(first).unwrap();
    renderer.revalidate(&result).unwrap();
}

#[test]
fn dynamic_definitions_resolve_from_a_local() {
    let log = log();
    let only = define("only", Scripted::new(&log, show_name()));
    let current = MutableCell::new(only);
    let name = MutableCell::new(Value::from("Ada"));
    let mut builder = ProgramBuilder::new();
    let slot = builder.local();
    builder
        .push_definition_ref(current.reference())
        .set_local(slot)
        .invoke_dynamic_component_from(slot, None, NAMED, |b| {
            b.self_path(&["name"]);
        })
        .invoke_dynamic_component_from(slot, None, NAMED, |b| {
            b.self_path(&["name"]);
        });
    let program = builder.build();

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, caller(&name))
        .unwrap();
    assert_eq!(renderer.env().render_html(), "AdaAda");
    assert_eq!(
        result.updates().kinds(),
        vec!["AssertDefinition", "CacheGroup", "AssertDefinition", "CacheGroup"]
    );
}

#[test]
fn dynamic_definitions_need_a_reference_in_the_local() {
    let error = invocation_error(|b, _definition, slot| {
        b.push_constant("not a definition")
            .set_local(slot)
            .push_dynamic_component_manager(slot);
    });
    assert!(matches!(
        error,
        VmError::MalformedProgram(MalformedProgramError::UnexpectedOperand {
            op: Op::PushDynamicComponentManager,
            expected: "definition reference",
            found: "reference",
            ..
        })
    ));
}

/// Outer component around an inner one whose `create` writes `theme`.
/// `outer_reads_theme` makes the outer layout read `theme` before the write.
fn stirred(log: &Log, theme: &MutableCell<Value>, outer_reads_theme: bool) -> Program {
    let inner = define(
        "inner",
        Scripted::new(log, layout(|b| {
            b.self_path(&["theme"]).append_text();
        }))
        .stirring(theme, "warm"),
    );
    let outer = define(
        "outer",
        Scripted::new(log, layout(|b| {
            if outer_reads_theme {
                b.self_path(&["theme"]).append_text();
            }
            b.invoke_component(&inner, None, InvocationArgs::default(), |_| {});
        })),
    );
    layout(|b| {
        b.self_path(&["theme"]).bind_dynamic_scope(&["theme"]);
        b.invoke_component(&outer, None, InvocationArgs::default(), |_| {});
        b.pop_dynamic_scope();
    })
}

fn themed(theme: &MutableCell<Value>) -> PathRef {
    RecordReference::new()
        .field("theme", theme.reference())
        .into_ref()
}

#[test]
fn writes_observed_during_render_leave_groups_current() {
    let log = log();
    let theme = MutableCell::new(Value::from("cold"));
    let program = stirred(&log, &theme, false);

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, themed(&theme))
        .unwrap();
    assert_eq!(renderer.env().render_html(), "warm");
    log.borrow_mut().clear();

    let report = renderer.revalidate(&result).unwrap();
    assert!(entries(&log).is_empty());
    assert_eq!(report.groups_entered, 0);
    assert_eq!(report.notifications, 0);
}

#[test]
fn writes_missed_during_render_reopen_the_group() {
    let log = log();
    let theme = MutableCell::new(Value::from("cold"));
    let program = stirred(&log, &theme, true);

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, themed(&theme))
        .unwrap();
    assert_eq!(renderer.env().render_html(), "coldwarm");
    log.borrow_mut().clear();

    let report = renderer.revalidate(&result).unwrap();
    assert_eq!(renderer.env().render_html(), "warmwarm");
    assert_eq!(entries(&log), vec!["did_update_layout:outer"]);
    assert_eq!(report.groups_entered, 1);
    assert_eq!(report.evaluated, 1);

    log.borrow_mut().clear();
    let idle = renderer.revalidate(&result).unwrap();
    assert!(entries(&log).is_empty());
    assert_eq!(idle.groups_entered, 0);
}

#[test]
fn constant_dynamic_definitions_register_nothing() {
    let log = log();
    let fixed = define("fixed", Scripted::new(&log, layout(|b| {
        b.text("x");
    })));
    let reference: DefinitionRef = Rc::new(ConstReference::new(fixed));
    let program = layout(|b| {
        b.invoke_dynamic_component(reference, None, InvocationArgs::default(), |_| {});
    });

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, undefined())
        .unwrap();
    assert_eq!(result.updates().kinds(), vec!["CacheGroup"]);
}

fn invocation_error(
    emit: impl FnOnce(&mut ProgramBuilder, &ComponentDefinition, u32),
) -> VmError {
    let log = log();
    let definition = define("scripted", Scripted::new(&log, show_name()));
    let mut builder = ProgramBuilder::new();
    let slot = builder.local();
    emit(&mut builder, &definition, slot);
    let program = builder.build();
    Renderer::new(MemoryHost::new())
        .render(MemoryHost::ROOT, &program, undefined())
        .err()
        .unwrap()
}

#[test]
fn element_operations_need_a_component_element() {
    let error = invocation_error(|b, definition, slot| {
        b.push_component_manager(definition)
            .set_component_state(slot)
            .push_args(0, &[])
            .create_component(0, slot)
            .open_element("div")
            .did_create_element(slot);
    });
    assert!(matches!(
        error,
        VmError::UnbalancedRegion(UnbalancedRegionError::NoElementOperations { element: 1 })
    ));
}

#[test]
fn layouts_require_a_created_instance() {
    let error = invocation_error(|b, definition, slot| {
        b.push_component_manager(definition)
            .set_component_state(slot)
            .get_component_layout(slot);
    });
    assert!(matches!(
        error,
        VmError::Lifecycle(LifecycleViolationError::NotCreated { .. })
    ));
}

#[test]
fn instances_are_created_once_per_slot() {
    let error = invocation_error(|b, definition, slot| {
        b.push_component_manager(definition)
            .set_component_state(slot)
            .push_args(0, &[])
            .create_component(0, slot)
            .push_args(0, &[])
            .create_component(0, slot);
    });
    assert!(matches!(
        error,
        VmError::Lifecycle(LifecycleViolationError::AlreadyCreated { .. })
    ));
}

#[test]
fn component_state_cannot_be_copied() {
    let error = invocation_error(|b, definition, slot| {
        b.push_component_manager(definition)
            .set_component_state(slot)
            .push_local(slot);
    });
    assert!(matches!(
        error,
        VmError::MalformedProgram(MalformedProgramError::UnexpectedOperand {
            op: Op::PushLocal,
            expected: "copyable value",
            found: "component state",
            ..
        })
    ));
}
