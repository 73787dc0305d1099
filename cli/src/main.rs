use std::path::PathBuf;

use anyhow::{Context, Result};
use prost::Message;
use strata_convert::pb::ModelProto;
use strata_convert::prelude::*;
use structopt::StructOpt;

fn main() {
    let cli_args = CliArgs::from_args();

    let level = match cli_args.verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_env("STRATA_LOG").init();

    if let Err(e) = cli_args.run() {
        log::error!("{e:?}");
        std::process::exit(1)
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "strata", about = "Translate an ONNX model into a Caffe-style network description")]
pub struct CliArgs {
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbosity: usize,
    /// Path to the ONNX model
    #[structopt(parse(from_os_str))]
    pub model: PathBuf,
    /// Where to write the encoded network, next to the model by default
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    pub output: Option<PathBuf>,
    /// Opset version the model is expected to use, 0 to skip the check
    #[structopt(long = "opset", default_value = "9")]
    pub opset: i64,
    /// Refuse nodes carrying attributes their converter does not know
    #[structopt(long = "strict")]
    pub strict: bool,
    /// Print the translated layers and blob shapes
    #[structopt(long = "dump")]
    pub dump: bool,
}

impl CliArgs {
    pub fn run(&self) -> Result<()> {
        let bytes =
            std::fs::read(&self.model).with_context(|| format!("Reading {:?}", self.model))?;
        let model = ModelProto::decode(&*bytes).with_context(|| format!("Decoding {:?}", self.model))?;
        let options = TranslateOptions::default()
            .with_opset(if self.opset == 0 { None } else { Some(self.opset) })
            .with_strict_attributes(self.strict);
        let network = strata_convert::strata().with_options(options).translate(&model)?;
        log::info!("Translated {} into {} layers", network.name, network.layers.len());

        if self.dump {
            for layer in &network.layers {
                println!("{layer}");
            }
            for (blob, shape) in network.shapes.iter() {
                println!("{blob}: {}", strata_convert::shape::display_shape(shape));
            }
        }

        let output = self.output.clone().unwrap_or_else(|| self.model.with_extension("caffemodel"));
        let encoded = network.to_proto()?.encode_to_vec();
        std::fs::write(&output, encoded).with_context(|| format!("Writing {output:?}"))?;
        log::info!("Wrote {output:?}");
        Ok(())
    }
}
