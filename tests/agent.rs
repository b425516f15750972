use burn::backend::{Autodiff, NdArray};
use ddqn::{
    model::dqn::{ConvLayerConfig, ModelConfig},
    training::{
        agent::AgentConfig,
        checkpoint::{Checkpoint, Tag},
        data::Transition,
    },
};
use rand::{Rng, SeedableRng, rngs::StdRng};

type B = Autodiff<NdArray>;

const SHAPE: [usize; 3] = [2, 6, 6];
const ACTIONS: usize = 3;

fn config() -> AgentConfig {
    AgentConfig::new().with_model(
        ModelConfig::new()
            .with_conv(vec![ConvLayerConfig::new(4, 3, 1)])
            .with_hidden_size(16),
    )
}

fn random_transition(rng: &mut StdRng) -> Transition {
    let size: usize = SHAPE.iter().product();

    Transition {
        state: (0..size).map(|_| rng.random()).collect(),
        action: rng.random_range(0..ACTIONS),
        reward: rng.random_range(-1.0..1.0),
        next_state: (0..size).map(|_| rng.random()).collect(),
        done: rng.random_bool(0.1),
    }
}

#[test]
fn online_learns_target_follows_on_sync() {
    let mut rng = StdRng::seed_from_u64(0xDEC0DE);
    let config = config()
        .with_batch_size(32)
        .with_memory_size(100)
        .with_target_update(3);
    let mut agent = config
        .init::<B>(SHAPE, ACTIONS, Default::default(), 7)
        .unwrap();

    let initial = agent.online().parameters();
    assert_eq!(agent.target().parameters(), initial);

    for _ in 0..31 {
        agent.store_transition(random_transition(&mut rng));
    }
    assert!(agent.learn().is_none());
    assert_eq!(agent.steps(), 0);
    assert_eq!(agent.online().parameters(), initial);

    agent.store_transition(random_transition(&mut rng));
    assert_eq!(agent.memory().len(), 32);

    let loss = agent.learn().unwrap();
    assert!(loss.is_finite());
    assert_eq!(agent.steps(), 1);
    assert_ne!(agent.online().parameters(), initial);
    assert_eq!(agent.target().parameters(), initial);

    agent.learn().unwrap();
    assert_eq!(agent.target().parameters(), initial);

    agent.learn().unwrap();
    assert_eq!(agent.steps(), 3);
    assert_eq!(agent.target().parameters(), agent.online().parameters());

    agent.learn().unwrap();
    assert_ne!(agent.target().parameters(), agent.online().parameters());
}

#[test]
fn checkpoint_restores_agent() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = Checkpoint::new(dir.path(), "Catch-v0");
    let mut rng = StdRng::seed_from_u64(1);

    let config = config().with_batch_size(8).with_memory_size(32).with_target_update(2);
    let mut agent = config.init::<B>(SHAPE, ACTIONS, Default::default(), 1).unwrap();

    (0..16).for_each(|_| agent.store_transition(random_transition(&mut rng)));
    (0..5).for_each(|_| {
        agent.learn().unwrap();
    });
    agent.save(&checkpoint, Tag::Latest).unwrap();

    let restored = config
        .init::<B>(SHAPE, ACTIONS, Default::default(), 2)
        .unwrap()
        .load(&checkpoint, Tag::Latest)
        .unwrap();

    assert_eq!(restored.steps(), 5);
    assert_eq!(restored.epsilon(), agent.epsilon());

    assert_eq!(restored.online().parameters(), agent.online().parameters());
    assert_eq!(restored.target().parameters(), agent.target().parameters());
    assert_ne!(restored.online().parameters(), restored.target().parameters());
}

#[test]
fn missing_checkpoint_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = Checkpoint::new(dir.path(), "Catch-v0");

    let agent = config().init::<B>(SHAPE, ACTIONS, Default::default(), 0).unwrap();

    assert!(agent.load(&checkpoint, Tag::Best).is_err());
}
