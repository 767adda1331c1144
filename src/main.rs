use jrt_rs::engine::NullEngine;
use jrt_rs::loader;
use jrt_rs::plan::MallocPlan;
use jrt_rs::vm::Jvm;

/// Boots the core over the classpath from the environment and drives the
/// named class to the ready state. Without an interpreter installed,
/// `<clinit>` bodies are empty; this exercises loading, resolution and VT
/// construction end to end.
fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(class_name) = args.next() else {
        eprintln!("usage: jrt <internal/class/Name>");
        std::process::exit(2);
    };

    let sources = Jvm::sources_from_env();
    let vm = match Jvm::boot(Box::new(MallocPlan), Box::new(NullEngine), sources) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("boot failed: {err}");
            std::process::exit(1);
        }
    };

    let names = vm.bootstrap_loader().names();
    let name = names.from_str(&class_name.replace('.', "/"));
    let result = vm
        .bootstrap_loader()
        .load_class(&name)
        .and_then(|class| loader::initialize_class(&vm, &class).map(|_| class));

    match result {
        Ok(class) => {
            let vt = class.vt().expect("ready class without a VT");
            log::info!(
                "{} ready: depth {}, {} secondary types",
                class.name,
                vt.depth,
                vt.nb_secondary_types()
            );
        }
        Err(err) => {
            eprintln!("{err}");
            vm.shutdown();
            std::process::exit(1);
        }
    }
    vm.shutdown();
}
