use std::fs;
use std::path::PathBuf;

use clap::Parser;
use probe_asm::*;

/// Injects a `System.out.println` probe into a compiled class.
#[derive(Parser, Debug)]
#[command(name = "probe-asm", version)]
struct Cli {
    /// Class file to instrument.
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// Directories searched for supertypes when frames need a common superclass.
    #[arg(long, value_name = "DIR")]
    classpath: Vec<PathBuf>,
    /// Class pattern; defaults to the input class itself.
    #[arg(long)]
    class: Option<String>,
    /// Method name; empty instruments every method.
    #[arg(long, default_value = "")]
    method: String,
    #[arg(long, value_parser = clap::value_parser!(Kind), default_value = "entry")]
    kind: Kind,
    #[arg(long = "where", value_parser = clap::value_parser!(Where), default_value = "before")]
    placement: Where,
    #[arg(long, default_value_t = 0)]
    line: u32,
    /// Owner of the called method, field or type the location refers to.
    #[arg(long)]
    target_class: Option<String>,
    #[arg(long)]
    target_method: Option<String>,
    #[arg(long)]
    field: Option<String>,
    #[arg(long = "type")]
    type_name: Option<String>,
    #[arg(long, default_value = "probe hit")]
    message: String,
}

/// Reads classes from directories laid out by package.
struct DirectoryLoader {
    roots: Vec<PathBuf>,
}

impl ClassLoader for DirectoryLoader {
    fn id(&self) -> u64 {
        1
    }

    fn parent(&self) -> Option<&dyn ClassLoader> {
        None
    }

    fn find_class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        let relative = ClassName::new(internal_name).resource_path();
        self.roots
            .iter()
            .find_map(|root| fs::read(root.join(&relative)).ok())
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let cli = Cli::parse();

    log::info!("Reading '{}'", cli.input.display());
    let bytes = fs::read(&cli.input)?;
    let class_name = match cli.class {
        Some(pattern) => pattern,
        None => ClassReader::new(&bytes)?.class_file().name()?.to_string(),
    };

    let mut location = Location::new(cli.kind);
    location.set_where(cli.placement).set_line(cli.line);
    if let Some(owner) = cli.target_class {
        location.set_clazz(owner);
    }
    if let Some(method) = cli.target_method {
        location.set_method(method);
    }
    if let Some(field) = cli.field {
        location.set_field(field);
    }
    if let Some(type_name) = cli.type_name {
        location.set_type(type_name);
    }
    log::info!("Instrumenting {class_name}.{} at {location}", cli.method);

    let code = insn_list! {
        [field GETSTATIC "java/lang/System", "out", "Ljava/io/PrintStream;"]
        [ldc cli.message.as_str()]
        [method INVOKEVIRTUAL "java/io/PrintStream", "println", "(Ljava/lang/String;)V"]
    };
    let probe = Probe::new(class_name.clone(), cli.method, location, code);

    let loader = DirectoryLoader {
        roots: cli.classpath,
    };
    let loader: &dyn ClassLoader = &loader;
    let cache = ClassCache::new();
    let transformer = Transformer::new(&cache, vec![probe]);
    let out = match transformer.try_transform(Some(loader), &bytes)? {
        Some(out) => out,
        None => {
            log::warn!("Nothing in {class_name} matched, copying the input unchanged");
            bytes
        }
    };

    log::info!("Writing '{}'", cli.output.display());
    fs::write(&cli.output, out)?;
    Ok(())
}
