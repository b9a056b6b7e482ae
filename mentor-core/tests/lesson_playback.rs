use approx::assert_abs_diff_eq;
use mentor_core::lesson::{Checkpoint, LessonEvent, LessonPlayer, LessonState};
use mentor_core::{OutputContext, PlaybackBuffer, Renderer};

const RATE: u32 = 1_000;
const STEP: f64 = 0.05;

struct Rig {
    ctx: OutputContext,
    renderer: Renderer,
    player: LessonPlayer,
}

impl Rig {
    fn new(duration: f64, times: &[f64]) -> Self {
        let (ctx, renderer) = OutputContext::new(RATE);
        let mut player = LessonPlayer::new(ctx.clone());
        let checkpoints = times
            .iter()
            .enumerate()
            .map(|(i, &t)| Checkpoint {
                time_secs: t,
                question: format!("question {}", i + 1),
            })
            .collect();
        player
            .load(PlaybackBuffer::silence(duration, RATE), checkpoints)
            .unwrap();
        Self {
            ctx,
            renderer,
            player,
        }
    }

    /// Step the clock like a host event loop until the player reports
    /// something or `limit` seconds pass.
    fn run(&mut self, limit: f64) -> Option<LessonEvent> {
        let steps = (limit / STEP).ceil() as usize;
        for _ in 0..steps {
            self.renderer.advance(STEP);
            for id in self.ctx.drain_ended() {
                if let Some(event) = self.player.handle_ended(id) {
                    return Some(event);
                }
            }
            if let Some(event) = self.player.tick() {
                return Some(event);
            }
        }
        None
    }
}

fn question(event: Option<LessonEvent>) -> String {
    match event {
        Some(LessonEvent::Checkpoint(c)) => c.question,
        other => panic!("expected a checkpoint, got {other:?}"),
    }
}

#[test]
fn checkpoints_fire_in_order_and_resume_after_each_answer() {
    let mut rig = Rig::new(10.0, &[3.0, 7.0]);
    rig.player.play(Some(0.0)).unwrap();

    assert_eq!(question(rig.run(5.0)), "question 1");
    assert_eq!(rig.player.state(), LessonState::AwaitingAnswer);
    assert_abs_diff_eq!(rig.player.pause_time(), 3.0, epsilon = STEP);

    // The clock keeps running while the learner thinks.
    assert!(rig.run(1.0).is_none());
    assert_abs_diff_eq!(rig.player.position(), 3.0, epsilon = STEP);

    rig.player.begin_response().unwrap();
    rig.player
        .play_follow_up(PlaybackBuffer::silence(0.5, RATE))
        .unwrap();
    assert_eq!(rig.run(1.0), Some(LessonEvent::Resumed));
    assert_eq!(rig.player.state(), LessonState::Talking);

    assert_eq!(question(rig.run(5.0)), "question 2");
    assert_abs_diff_eq!(rig.player.pause_time(), 7.0, epsilon = STEP);

    rig.player.begin_response().unwrap();
    assert_eq!(rig.player.finish_response().unwrap(), LessonEvent::Resumed);
    assert_eq!(rig.run(4.0), Some(LessonEvent::Finished));
}

#[test]
fn short_lesson_plays_to_the_end_and_resets() {
    let mut rig = Rig::new(5.0, &[]);
    rig.player.play(Some(0.0)).unwrap();

    assert_eq!(rig.run(6.0), Some(LessonEvent::Finished));
    assert_eq!(rig.player.state(), LessonState::Idle);
    assert_abs_diff_eq!(rig.player.position(), 5.0);
    assert_eq!(rig.player.pause_time(), 0.0);
}

#[test]
fn pause_and_resume_keep_the_position() {
    let mut rig = Rig::new(10.0, &[8.0]);
    rig.player.play(Some(0.0)).unwrap();
    assert!(rig.run(2.0).is_none());

    rig.player.pause();
    assert_eq!(rig.player.state(), LessonState::Paused);
    let paused_at = rig.player.pause_time();
    assert_abs_diff_eq!(paused_at, 2.0, epsilon = STEP);

    assert!(rig.run(3.0).is_none());
    assert_eq!(rig.player.position(), paused_at);

    rig.player.play(None).unwrap();
    assert!(rig.run(1.0).is_none());
    assert_abs_diff_eq!(rig.player.position(), paused_at + 1.0, epsilon = STEP);
}

#[test]
fn seek_is_clamped_to_the_track() {
    let mut rig = Rig::new(4.0, &[]);
    rig.player.seek(99.0).unwrap();
    assert_eq!(rig.player.pause_time(), 4.0);
    rig.player.seek(-3.0).unwrap();
    assert_eq!(rig.player.pause_time(), 0.0);

    rig.player.play(None).unwrap();
    rig.player.seek(3.5).unwrap();
    assert_eq!(rig.player.state(), LessonState::Talking);
    assert_eq!(rig.run(1.0), Some(LessonEvent::Finished));
}

#[test]
fn checkpoint_past_the_end_fires_when_the_track_runs_out() {
    let mut rig = Rig::new(2.0, &[30.0]);
    rig.player.play(Some(0.0)).unwrap();

    assert_eq!(question(rig.run(3.0)), "question 1");
    assert_abs_diff_eq!(rig.player.pause_time(), 2.0);

    rig.player.begin_response().unwrap();
    assert_eq!(
        rig.player.finish_response().unwrap(),
        LessonEvent::SegmentExhausted
    );
    assert_eq!(rig.player.state(), LessonState::Idle);
}
