use abode::{
    abode_candle_rnn::{default_core_registry, RnnConfig, RnnStateEncoder},
    abode_core::{
        dummy::{CountdownEnv, CountdownEnvConfig},
        record::{BufferedRecorder, Record, RecordValue, Recorder},
        sensor::Observations,
    },
    abode_vec_env::{Backend, VecEnv, VecEnvConfig},
    RolloutWindow,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};

const HIDDEN_SIZE: usize = 16;

/// Collect a rollout window with random actions and encode it with a GRU
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of environment slots
    #[arg(long, default_value_t = 4)]
    num_envs: usize,

    /// Number of steps of the rollout window
    #[arg(long, default_value_t = 16)]
    steps: usize,

    /// Step all slots in the main thread
    #[arg(long, default_value_t = false)]
    in_process: bool,
}

fn features(obs: &[Observations], device: &Device) -> Result<Tensor> {
    let rows = obs.iter().map(|o| o.flatten()).collect::<Vec<_>>();
    let dim = rows.first().map(|r| r.len()).unwrap_or(0);
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (obs.len(), dim), device)?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    anyhow::ensure!(args.steps > 0, "--steps must be positive");
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(42);

    let backend = match args.in_process {
        true => Backend::InProcess,
        false => Backend::Threaded,
    };
    let config = VecEnvConfig::default().num_envs(args.num_envs).backend(backend);
    let env_config = CountdownEnvConfig::default()
        .episode_length(3)
        .length_per_seed(1);
    let mut envs = VecEnv::<CountdownEnv>::build(&config, &env_config)?;

    let rnn_config = RnnConfig::default().input_size(2).hidden_size(HIDDEN_SIZE);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let encoder = RnnStateEncoder::build(&rnn_config, &default_core_registry()?, vb)?;

    let mut window = RolloutWindow::new(envs.num_envs());
    let hidden = encoder.zero_hidden(envs.num_envs(), &device)?;
    let mut obs = envs.reset()?;
    let mut xs = vec![];
    let mut recorder = BufferedRecorder::new();

    for t in 0..args.steps {
        xs.push(features(&obs, &device)?);
        let acts = (0..envs.num_envs())
            .map(|_| rng.gen_range(0..3))
            .collect::<Vec<i64>>();
        let step = envs.step(acts)?;
        window.push(&step.dones)?;

        let mut record = Record::from_scalar("Step", t as f32);
        record.insert("Reward", RecordValue::Array1(step.rewards.clone()));
        recorder.write(record);
        obs = step.observations;
    }

    let info = window.descriptor()?;
    info!(
        "Window of {} records packed into {} sequences, batch sizes {:?}",
        info.len(),
        info.num_sequences(),
        info.num_seqs_at_step
    );

    let x = Tensor::cat(&xs, 0)?;
    let (y, hidden) = window.forward(&encoder, &x, &hidden)?;
    info!("Encoded output {:?}, final hidden state {:?}", y.dims(), hidden.dims());
    let total_reward = recorder
        .iter()
        .filter_map(|r| r.get_array1("Reward").ok())
        .flatten()
        .sum::<f32>();
    info!("Recorded {} steps, total reward {}", recorder.len(), total_reward);

    envs.close();
    Ok(())
}
