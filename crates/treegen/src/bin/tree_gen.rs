use clap::Parser;
use treegen::cli::TreeGenArgs;
use treegen::codegen::CodeGenerator;
use treegen::error::Result;

fn main() {
    let args = TreeGenArgs::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(err) = run(&args) {
        eprintln!("{}", err.render_line(&args.input.display().to_string()));
        std::process::exit(1);
    }
}

fn run(args: &TreeGenArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.input)?;
    let file = treegen::parser::parse(&source)?;
    let model = treegen::resolve::build(&file, &source)?;

    let source_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());
    let generator = CodeGenerator::new(&model, source_name);
    generator.write_outputs(
        &args.header_out,
        &args.source_out,
        args.dynamic_out.as_deref(),
    )
}
