use abode::{
    abode_candle_rnn::{default_core_registry, IdentityCore, RnnConfig, RnnStateEncoder},
    abode_core::{
        dummy::{CountdownEnv, CountdownEnvConfig},
        sensor::Observations,
        AbodeError,
    },
    abode_vec_env::{Backend, VecEnv, VecEnvConfig},
    EncoderPolicy, EvaluatorConfig, RecurrentEvaluator, RolloutWindow,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn features(obs: &[Observations]) -> Result<Tensor> {
    let rows = obs.iter().map(|o| o.flatten()).collect::<Vec<_>>();
    let dim = rows[0].len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (obs.len(), dim), &Device::Cpu)?)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok((a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
}

fn identity_policy() -> EncoderPolicy<CountdownEnv> {
    let encoder = RnnStateEncoder::new(Box::new(IdentityCore::new(1, 2)));
    EncoderPolicy::new(encoder, |o: &Observations| o.flatten(), |_: &[f32]| 1, Device::Cpu)
}

/// Running a window packed gives the same result as stepping it one step at a
/// time.
#[test]
fn test_window_matches_single_steps() -> Result<()> {
    init_logger();
    let (n_envs, n_steps) = (3, 4);
    let config = VecEnvConfig::default().num_envs(n_envs);
    let env_config = CountdownEnvConfig::default()
        .episode_length(2)
        .length_per_seed(1);
    let mut envs = VecEnv::<CountdownEnv>::build(&config, &env_config)?;

    let rnn_config = RnnConfig::default().input_size(2).hidden_size(6);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let encoder = RnnStateEncoder::build(&rnn_config, &default_core_registry()?, vb)?;

    let mut window = RolloutWindow::new(n_envs);
    let mut hidden = encoder.zero_hidden(n_envs, &Device::Cpu)?;
    let mut obs = envs.reset()?;

    for _ in 0..2 {
        let hidden_start = hidden.clone();
        let mut xs = vec![];
        let mut ys = vec![];
        for _ in 0..n_steps {
            let x = features(&obs)?;
            let (y, h) = encoder.forward(&x, &hidden, &window.step_masks(), None)?;
            let step = envs.step(vec![1; n_envs])?;
            window.push(&step.dones)?;
            obs = step.observations;
            hidden = h;
            xs.push(x);
            ys.push(y);
        }

        let x = Tensor::cat(&xs, 0)?;
        let (y, h) = window.forward(&encoder, &x, &hidden_start)?;
        assert!(max_abs_diff(&y, &Tensor::cat(&ys, 0)?)? < 1e-5);
        assert!(max_abs_diff(&h, &hidden)? < 1e-5);
        window.advance();
    }

    envs.close();
    Ok(())
}

#[test]
fn test_evaluator_pauses_finished_slots() -> Result<()> {
    init_logger();
    for backend in [Backend::Threaded, Backend::InProcess] {
        // Episodes of slots 0, 1 and 2 last 2, 3 and 4 steps.
        let vec_env_config = VecEnvConfig::default().num_envs(3).backend(backend);
        let env_config = CountdownEnvConfig::default()
            .episode_length(2)
            .length_per_seed(1);
        let config = EvaluatorConfig::default().episodes_per_slot(2);
        let mut evaluator =
            RecurrentEvaluator::<CountdownEnv>::build(&config, &vec_env_config, &env_config)?;

        let mut policy = identity_policy();
        assert_eq!(policy.encoder().num_recurrent_layers(), 1);
        assert_eq!(policy.encoder().hidden_size(), 2);
        let record = evaluator.evaluate(&mut policy)?;
        assert_eq!(record.get_scalar("Episodes")?, 6.0);
        assert_eq!(record.get_scalar("Episode return")?, 3.0);
        assert_eq!(evaluator.envs().running_slots(), &[0, 1, 2]);

        // Slot 2 does not finish its episode within the step limit.
        let config = EvaluatorConfig::default().max_steps(3);
        let mut evaluator =
            RecurrentEvaluator::<CountdownEnv>::build(&config, &vec_env_config, &env_config)?;
        let record = evaluator.evaluate(&mut policy)?;
        assert_eq!(record.get_scalar("Episodes")?, 2.0);
        assert_eq!(record.get_scalar("Episode return")?, 2.5);
        evaluator.close();
    }
    Ok(())
}

#[test]
fn test_evaluator_worker_failure() -> Result<()> {
    init_logger();
    let vec_env_config = VecEnvConfig::default().num_envs(2);
    let env_config = CountdownEnvConfig::default().episode_length(5).fail_at(1, 3);
    let mut evaluator = RecurrentEvaluator::<CountdownEnv>::build(
        &EvaluatorConfig::default(),
        &vec_env_config,
        &env_config,
    )?;

    let err = evaluator.evaluate(&mut identity_policy()).unwrap_err();
    match err.downcast_ref::<AbodeError>() {
        Some(AbodeError::WorkerFailure { slot, .. }) => assert_eq!(*slot, 1),
        e => panic!("unexpected error {:?}", e),
    }
    evaluator.close();
    assert!(evaluator.envs().is_closed());
    Ok(())
}
