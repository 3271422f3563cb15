#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use std::f64;
use std::fs::File;
use std::io::{self, Write};
use std::process;

use clap::{App, AppSettings, Arg, ArgMatches};

use lightlda::data_block::{self, DataBlock};
use lightlda::synthetic::make_dataset;
use lightlda::{LdaConfig, LdaEngine, Result, Xorshift};

const TOP_WORDS: usize = 10;

fn build_config(matches: &ArgMatches) -> Result<LdaConfig> {
    let mut config = match matches.value_of("config") {
        Some(fp) => LdaConfig::from_json_file(fp)?,
        None => LdaConfig::default(),
    };
    if matches.is_present("topics") {
        config.num_topics = value_t_or_exit!(matches, "topics", usize);
    }
    if matches.is_present("alpha") {
        config.alpha = value_t_or_exit!(matches, "alpha", f64);
    }
    if matches.is_present("beta") {
        config.beta = value_t_or_exit!(matches, "beta", f64);
    }
    if matches.is_present("mh-step") {
        config.mh_step = value_t_or_exit!(matches, "mh-step", usize);
    }
    if matches.is_present("iterations") {
        config.num_iterations = value_t_or_exit!(matches, "iterations", usize);
    }
    if matches.is_present("workers") {
        config.num_worker_threads = value_t_or_exit!(matches, "workers", usize);
    }
    if matches.is_present("load-factor") {
        config.load_factor = value_t_or_exit!(matches, "load-factor", usize);
    }
    if matches.is_present("model-capacity") {
        config.model_max_capacity = value_t_or_exit!(matches, "model-capacity", usize);
    }
    if matches.is_present("alias-capacity") {
        config.alias_max_capacity = value_t_or_exit!(matches, "alias-capacity", usize);
    }
    if matches.is_present("ll-interval") {
        config.compute_ll_interval = Some(value_t_or_exit!(matches, "ll-interval", usize));
    }
    if matches.is_present("dump-interval") {
        config.dump_model_interval = Some(value_t_or_exit!(matches, "dump-interval", usize));
    }
    if matches.is_present("seed") {
        config.seed = Some(value_t_or_exit!(matches, "seed", u64));
    }
    config.validate()?;
    Ok(config)
}

fn init_rng(config: &LdaConfig) -> Xorshift {
    match config.seed {
        // Offset so initial topics and sampler streams differ.
        Some(seed) => Xorshift::new(seed.wrapping_add(0x9E37_79B9) as u32),
        None => Xorshift::from_rng(&mut rand::thread_rng()),
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let mut config = build_config(matches)?;
    let mut rng = init_rng(&config);

    // Labels for printing topics: original ids or vocabulary entries.
    let mut labels: Option<Vec<String>> = None;
    let mut original_ids: Option<Vec<u32>> = None;

    let block = if matches.is_present("test-dataset") {
        let vocab_size = 10000;
        let alpha: Vec<f64> = vec![0.1; config.num_topics];
        let beta: Vec<f64> = vec![0.1; vocab_size];
        write!(&mut io::stderr(), "Generating a dataset...")?;
        let dataset = make_dataset(&mut rng, 1000, f64::ln(400f64), 0.3, &alpha, &beta);
        writeln!(&mut io::stderr(), " done.")?;
        let (dataset, vocab_size, ids) = data_block::compact_words(dataset);
        writeln!(&mut io::stderr(), "Vocab: {}", vocab_size)?;
        config.num_vocabs = vocab_size;
        original_ids = Some(ids);
        DataBlock::from_bags(&dataset, config.num_topics, &mut rng)
    } else if let Some(input_fp) = matches.value_of("INPUT") {
        if let Some(vocab_fp) = matches.value_of("VOCAB") {
            labels = Some(data_block::load_text_vocabulary(vocab_fp)?);
        }
        if matches.is_present("block") {
            DataBlock::read(input_fp)?
        } else {
            let bags = data_block::load_bags(input_fp)?;
            DataBlock::from_bags(&bags, config.num_topics, &mut rng)
        }
    } else {
        return Ok(());
    };
    info!("Loaded {} documents, {} tokens", block.len(), block.num_tokens());

    let mut engine = LdaEngine::new(config, block)?;
    if let Some(prefix) = matches.value_of("output") {
        engine.set_output_prefix(prefix);
    }
    let num_iterations = engine.config().num_iterations;
    engine.train(|report| {
        let _ = write!(&mut io::stderr(), "\rIteration {}/{}", report.iteration + 1, num_iterations);
    })?;
    writeln!(&mut io::stderr(), "\rTrained.")?;

    {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        match (&labels, &original_ids) {
            (Some(vocab), _) => engine.print_topics_by(&mut out, TOP_WORDS, |w| {
                vocab.get(w as usize).cloned().unwrap_or_else(|| w.to_string())
            })?,
            (None, Some(ids)) => engine.print_topics_by(&mut out, TOP_WORDS, |w| ids[w as usize])?,
            (None, None) => engine.print_topics_by(&mut out, TOP_WORDS, |w| w)?,
        }
    }

    if let Some(prefix) = matches.value_of("output") {
        engine.dump_word_topic(format!("{}.word_topic", prefix))?;
    }
    if let Some(fp) = matches.value_of("model") {
        let mut file = File::create(&fp)?;
        serde_json::to_writer_pretty(&mut file, &engine.summary(TOP_WORDS))?;
    }
    if let Some(fp) = matches.value_of("save-block") {
        engine.block().write(fp)?;
        info!("Saved data block to {}", fp);
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let numeric = |name: &'static str, value_name: &'static str, help: &'static str| {
        Arg::with_name(name).long(name).takes_value(true).value_name(value_name).help(help)
    };
    let matches = App::new("LightLDA")
        .version("0.1")
        .author("Yuta Taniguchi <yuta.taniguchi.y.t@gmail.com>")
        .about("Latent Dirichlet allocation with a Metropolis-Hastings sampler")
        .arg(numeric("topics", "NUMBER", "Set the number of topics"))
        .arg(numeric("alpha", "FLOAT", "Set the document-topic prior"))
        .arg(numeric("beta", "FLOAT", "Set the topic-word prior"))
        .arg(numeric("mh-step", "NUMBER", "Set the number of Metropolis-Hastings rounds per token"))
        .arg(numeric("iterations", "NUMBER", "Set the number of passes over the corpus"))
        .arg(numeric("workers", "NUMBER", "Set the number of sampling threads"))
        .arg(numeric("load-factor", "NUMBER", "Set the sparse row capacity factor"))
        .arg(numeric("model-capacity", "CELLS", "Limit row memory per model slice (0 = unbounded)"))
        .arg(numeric("alias-capacity", "CELLS", "Limit alias memory per model slice (0 = unbounded)"))
        .arg(numeric("ll-interval", "NUMBER", "Compute the log-likelihood every NUMBER iterations"))
        .arg(numeric("dump-interval", "NUMBER", "Dump the word-topic table every NUMBER iterations"))
        .arg(numeric("seed", "NUMBER", "Seed the random number generators"))
        .arg(Arg::with_name("config")
             .long("config")
             .takes_value(true)
             .value_name("JSON-FILE")
             .help("Read settings from a JSON file; flags override it"))
        .arg(Arg::with_name("output")
             .long("output")
             .takes_value(true)
             .value_name("PREFIX")
             .help("Write word-topic dumps to PREFIX.word_topic"))
        .arg(Arg::with_name("model")
             .long("model")
             .value_name("MODEL-FILE")
             .help("Write a JSON model summary")
             .takes_value(true))
        .arg(Arg::with_name("block")
             .long("block")
             .help("Read INPUT as a binary data block instead of libsvm text"))
        .arg(Arg::with_name("save-block")
             .long("save-block")
             .takes_value(true)
             .value_name("FILE")
             .help("Write the documents with their final topics as a data block"))
        .arg(Arg::with_name("test-dataset")
             .long("test-dataset")
             .help("Run with automatically generated dataset"))
        .arg(Arg::with_name("INPUT")
             .help("Sets the input file to use")
             .required(false)
             .index(1))
        .arg(Arg::with_name("VOCAB")
             .help("Sets the vocabulary file, one word per line")
             .required(false)
             .index(2))
        .setting(AppSettings::ArgRequiredElseHelp)
        .get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        let _ = writeln!(&mut io::stderr(), "error: {}", e);
        process::exit(1);
    }
}
