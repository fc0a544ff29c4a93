use kindle_core::{
    MemoryHost, MutableCell, ProgramBuilder, RecordReference, RenderResult, Renderer, Value,
};
use criterion::{criterion_group, criterion_main, Criterion};

const WIDTH: usize = 500;

struct WideTree {
    renderer: Renderer<MemoryHost>,
    result: RenderResult,
    items: Vec<MutableCell<Value>>,
    class: MutableCell<Value>,
}

/// Renders `WIDTH` list items, each with its own text cell and a `class`
/// attribute shared by every item.
fn wide_tree() -> WideTree {
    let items: Vec<MutableCell<Value>> = (0..WIDTH)
        .map(|index| MutableCell::new(Value::from(index as i64)))
        .collect();
    let class = MutableCell::new(Value::from("even"));
    let names: Vec<String> = (0..WIDTH).map(|index| format!("item{index}")).collect();
    let self_ref = names
        .iter()
        .zip(&items)
        .fold(
            RecordReference::new().field("class", class.reference()),
            |record, (name, cell)| record.field(name, cell.reference()),
        )
        .into_ref();

    let mut builder = ProgramBuilder::new();
    builder.open_element("ul").flush_element();
    for name in &names {
        builder
            .open_element("li")
            .self_path(&["class"])
            .dynamic_attr("class")
            .flush_element()
            .self_path(&[name.as_str()])
            .append_text()
            .close_element();
    }
    builder.close_element();
    let program = builder.build();

    let mut renderer = Renderer::new(MemoryHost::new());
    let result = renderer
        .render(MemoryHost::ROOT, &program, self_ref)
        .expect("initial render");
    WideTree {
        renderer,
        result,
        items,
        class,
    }
}

fn revalidate_unchanged(c: &mut Criterion) {
    let mut tree = wide_tree();
    c.bench_function("revalidate_unchanged_wide_tree", |b| {
        b.iter(|| tree.renderer.revalidate(&tree.result).expect("revalidate"));
    });
}

fn revalidate_single_cell(c: &mut Criterion) {
    let mut tree = wide_tree();
    let target = tree.items[WIDTH / 2].clone();
    let mut counter = 0_i64;
    c.bench_function("revalidate_single_cell_wide_tree", |b| {
        b.iter(|| {
            counter += 1;
            target.set(Value::from(counter)).expect("set");
            tree.renderer.revalidate(&tree.result).expect("revalidate")
        });
    });
}

fn revalidate_shared_attribute(c: &mut Criterion) {
    let mut tree = wide_tree();
    let mut odd = false;
    c.bench_function("revalidate_shared_attribute_wide_tree", |b| {
        b.iter(|| {
            odd = !odd;
            let class = if odd { "odd" } else { "even" };
            tree.class.set(Value::from(class)).expect("set");
            tree.renderer.revalidate(&tree.result).expect("revalidate")
        });
    });
}

criterion_group!(
    benches,
    revalidate_unchanged,
    revalidate_single_cell,
    revalidate_shared_attribute
);
criterion_main!(benches);
