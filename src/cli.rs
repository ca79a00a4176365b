use clap::Parser;
use hsmc_core::codegen::{self, GenOptions, TargetLang};
use hsmc_core::validate::{self, has_errors, Severity};
use hsmc_uml::preprocess;
use log::info;
use std::fs;
use std::path::PathBuf;

/// A compiler for annotated hierarchical state diagrams
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path of the annotated diagram source
    #[arg(value_hint = clap::ValueHint::FilePath)]
    model: PathBuf,
    /// Validate only; generate nothing
    #[arg(long, default_value = "false")]
    check: bool,
    /// Write the renderer-safe diagram (and its metadata side channel) here
    #[arg(long)]
    render: Option<PathBuf>,
    /// Directory receiving the generated header/source pair
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// Target language of the generated code
    #[arg(long, default_value = "c")]
    lang: String,
    /// Leave explanatory comments out of the generated code
    #[arg(long, default_value = "false")]
    no_comments: bool,
}

impl Cli {
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("compiling `{}`", self.model.display());
        let machine = hsmc_uml::load(&self.model)?;
        let diagnostics = validate::validate(&machine);
        for diagnostic in &diagnostics {
            println!("{diagnostic}");
        }

        if let Some(render) = &self.render {
            let source = fs::read_to_string(&self.model)?;
            let (diagram, meta) = preprocess(&source);
            fs::write(render, diagram)?;
            let side_channel = render.with_extension("meta.json");
            fs::write(&side_channel, serde_json::to_string_pretty(&meta)?)?;
            println!(
                "rendered diagram to {} (metadata in {})",
                render.display(),
                side_channel.display()
            );
        }

        // Errors block generation; warnings do not.
        if has_errors(&diagnostics) {
            return Err(format!("validation of `{}` failed", machine.name).into());
        }
        if self.check {
            let warnings = diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Warning)
                .count();
            println!("`{}` is valid ({warnings} warning(s))", machine.name);
            return Ok(());
        }

        let options = GenOptions {
            lang: self.lang.parse::<TargetLang>()?,
            comments: !self.no_comments,
        };
        let code = codegen::generate(&machine, &options);
        let stem = machine.name.to_lowercase();
        let extension = match options.lang {
            TargetLang::C => "c",
            TargetLang::Cpp => "cpp",
        };
        let header = self.out_dir.join(format!("{stem}.h"));
        let source = self.out_dir.join(format!("{stem}.{extension}"));
        fs::write(&header, code.header)?;
        fs::write(&source, code.source)?;
        println!("generated {} and {}", header.display(), source.display());
        Ok(())
    }
}
