use criterion::measurement::WallTime;
use criterion::{
    BatchSize, BenchmarkGroup, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main,
};
use kython_vm::Interpreter;
use kython_vm::bytecode::{CodeBuilder, CodeFlags, CodeObject, Opcode};

const SIZES: [i64; 3] = [100, 1_000, 10_000];

/// total = 0
/// for i in range(n): total += i
fn counting_loop(n: i64) -> CodeObject {
    let mut module = CodeBuilder::new("<module>");
    let top = module.new_label();
    let done = module.new_label();
    module.load_int(0).store_name("total");
    module
        .load_name("range")
        .load_int(n)
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter, 0);
    module.bind(top).emit_jump(Opcode::ForIter, done);
    module
        .store_name("i")
        .load_name("total")
        .load_name("i")
        .emit(Opcode::InplaceAdd, 0)
        .store_name("total")
        .emit_jump(Opcode::JumpAbsolute, top);
    module.bind(done).load_name("total").return_value();
    module.finish().unwrap()
}

/// def squares(n):
///     for i in range(n): yield i * i
/// sum(squares(n))
fn generator_pipeline(n: i64) -> CodeObject {
    let mut squares = CodeBuilder::function("squares", &["n"]).with_flags(CodeFlags::GENERATOR);
    let top = squares.new_label();
    let done = squares.new_label();
    squares
        .load_global("range")
        .load_fast("n")
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::GetIter, 0);
    squares.bind(top).emit_jump(Opcode::ForIter, done);
    squares
        .store_fast("i")
        .load_fast("i")
        .load_fast("i")
        .emit(Opcode::BinaryMultiply, 0)
        .emit(Opcode::YieldValue, 0)
        .emit(Opcode::PopTop, 0)
        .emit_jump(Opcode::JumpAbsolute, top);
    squares.bind(done).load_none().return_value();

    let mut module = CodeBuilder::new("<module>");
    module
        .load_code(squares.finish().unwrap())
        .load_str("squares")
        .emit(Opcode::MakeFunction, 0)
        .store_name("squares");
    module
        .load_name("sum")
        .load_name("squares")
        .load_int(n)
        .emit(Opcode::CallFunction, 1)
        .emit(Opcode::CallFunction, 1)
        .return_value();
    module.finish().unwrap()
}

fn bench_module(group: &mut BenchmarkGroup<'_, WallTime>, n: i64, code: &CodeObject) {
    Interpreter::new(Default::default()).enter(|vm| {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), code, |b, code| {
            b.iter_batched(
                || code.clone(),
                |code| {
                    if let Err(exc) = vm.run_module(code, "__main__") {
                        vm.print_exception(&exc);
                        panic!("benchmark module raised");
                    }
                },
                BatchSize::SmallInput,
            )
        });
    })
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("counting_loop");
    for n in SIZES {
        bench_module(&mut group, n, &counting_loop(n));
    }
    group.finish();

    let mut group = c.benchmark_group("generator_pipeline");
    for n in SIZES {
        bench_module(&mut group, n, &generator_pipeline(n));
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
