/// Synthetic separation training - quantization-aware, single process
///
/// Usage: `cargo run --example train_synthetic [STEMS_DIR]`. Without a
/// directory, a random two-source dataset is generated.
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use demix::data::{InMemoryDataset, NumpyStemDataset, SourceDataset};
use demix::training::{DiffQuantizer, DiffQuantizerConfig, L1Loss, Trainer, TrainingConfig};
use demix::{ConvSeparator, SeparatorConfig};

fn synthetic(n: usize, device: &Device) -> anyhow::Result<InMemoryDataset> {
    // one smooth source and one noisy source per example
    let t = Tensor::arange(0f32, 256., device)?.affine(0.05, 0.0)?;
    let mut examples = Vec::with_capacity(n);
    for i in 0..n {
        let tone = t.affine(1.0 + i as f64 * 0.1, 0.0)?.sin()?;
        let noise = Tensor::randn(0f32, 0.3, 256, device)?;
        examples.push(Tensor::stack(&[tone, noise], 0)?.unsqueeze(1)?);
    }
    Ok(InMemoryDataset::new(examples)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    let (train_set, valid_set, model_config): (Box<dyn SourceDataset>, Box<dyn SourceDataset>, _) =
        match std::env::args().nth(1) {
            Some(dir) => {
                let train = NumpyStemDataset::from_directory(format!("{}/train", dir))?;
                let valid = NumpyStemDataset::from_directory(format!("{}/valid", dir))?;
                let config = SeparatorConfig {
                    sources: train.num_sources(),
                    channels: train.channels(),
                    ..Default::default()
                };
                log::info!("Sources: {:?}", train.metadata().sources);
                (Box::new(train), Box::new(valid), config)
            }
            None => {
                let config = SeparatorConfig {
                    sources: 2,
                    channels: 1,
                    hidden: 16,
                    kernel_size: 5,
                };
                (Box::new(synthetic(64, &device)?), Box::new(synthetic(16, &device)?), config)
            }
        };

    log::info!("Train examples: {}, valid examples: {}", train_set.len(), valid_set.len());
    log::info!("Model configuration: {:#?}", model_config);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = ConvSeparator::new(model_config, vb)?;
    let params = varmap.all_vars();
    let total_params: usize = params.iter().map(|v| demix::utils::count_parameters(v)).sum();
    log::info!("Parameters: {}", total_params);

    let quantizer = DiffQuantizer::new(&params, DiffQuantizerConfig::default(), &device)?;
    let mut vars = params.clone();
    vars.extend(quantizer.vars());
    let optimizer = AdamW::new(
        vars,
        ParamsAdamW {
            lr: 3e-3,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let training_config = TrainingConfig {
        repeat: 2,
        seed: Some(42),
        workers: 2,
        batch_size: 8,
        progress: true,
    };
    log::info!("Training configuration: {:?}", training_config);

    let mut trainer = Trainer::new(model, params, L1Loss, optimizer, training_config, device)
        .with_quantizer(Box::new(quantizer), 1e-4);
    let history = trainer.fit(train_set.as_ref(), valid_set.as_ref(), 10)?;

    if let Some(last) = history.last() {
        log::info!(
            "Final: train={:.4} valid={:.4} best={:.4} size={:.3}MB lr={}",
            last.train_loss,
            last.valid_loss,
            last.best_loss,
            last.model_size,
            trainer.optimizer().learning_rate()
        );
    }

    Ok(())
}
