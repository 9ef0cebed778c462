mod common;

use winery_core::{GameCalendar, StaffMember, StaffRoster, Task, TaskScheduler, WineryState};

const SCRIPT: &[&str] = &[
    "harvest test_block",
    "hire Marta Vidal",
    "week 2",
    "plant fallow_block",
    "tool 3 Tractor#1",
    "week 3",
    "upgrade cellar",
    "week 5",
];

fn play() -> (WineryState, Vec<Task>, Vec<StaffMember>, GameCalendar) {
    let mut app = common::test_app();
    for line in SCRIPT {
        common::run(&mut app, line);
    }
    let world = &app.world;
    (
        world.resource::<WineryState>().clone(),
        world.resource::<TaskScheduler>().snapshot(),
        world.resource::<StaffRoster>().members().to_vec(),
        *world.resource::<GameCalendar>(),
    )
}

#[test]
fn identical_scripts_produce_identical_games() {
    let first = play();
    let second = play();

    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
    assert_eq!(first.3, second.3);
    assert_eq!(first.3.tick, 10);
}
