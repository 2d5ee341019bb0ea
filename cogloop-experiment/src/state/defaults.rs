//! Built-in bodies of the lifecycle states.

use cogloop_core::{Fast, Graphics, StimulusType, TimerSchema, TriggerSchema};

use super::table::StateTable;
use super::{END, IDLE, INIT, ITI, LOADING, PAUSE};

const WELCOME: &str = "welcome";
const PAUSE_MESSAGE: &str = "pause_message";

pub(super) fn install_fast(table: &mut StateTable<Fast>) {
    table.set_move_on(IDLE, TriggerSchema::move_on().any());
    table.set_hold(PAUSE);

    table.set_body(LOADING, |ctx| {
        if ctx.singleshot("ready") {
            let devices = ctx.devices();
            let names: Vec<&str> = devices.names().collect();
            log::info!("{} device(s) ready: {}", names.len(), names.join(", "));
        }
        Ok(())
    });

    table.set_body(INIT, |ctx| {
        if ctx.singleshot("start") {
            ctx.start_timer(TimerSchema::runtime());
            ctx.raise(TriggerSchema::start());
            ctx.stamp("trial_start");
        }
        Ok(())
    });

    // Waits for the graphics loop to lower the pause trigger.
    table.set_body(PAUSE, |ctx| {
        if !ctx.trigger_value(TriggerSchema::pause()) {
            ctx.move_on();
        }
        Ok(())
    });

    table.set_body(END, |ctx| {
        ctx.stop_own_timers();
        ctx.set_trigger(TriggerSchema::start(), false);
        ctx.stamp("trial_end");
        Ok(())
    });
}

pub(super) fn install_graphics(table: &mut StateTable<Graphics>) {
    table.set_move_on(IDLE, TriggerSchema::move_on().any());
    table.set_move_on(PAUSE, TriggerSchema::move_on().any());

    table.set_body(IDLE, |ctx| {
        if ctx.singleshot("welcome") {
            let text = ctx.resources().welcome_text.clone();
            ctx.stimuli()
                .insert(WELCOME, StimulusType::text(text), (0.0, 0.0));
            ctx.show(WELCOME)?;
        }
        if ctx.leaving() {
            ctx.hide(WELCOME)?;
        }
        Ok(())
    });

    table.set_body(ITI, |ctx| {
        if ctx.singleshot("blank") {
            ctx.stimuli().hide_all();
        }
        Ok(())
    });

    table.set_body(INIT, |ctx| {
        if ctx.singleshot("stimuli") {
            let trial = ctx.trial().clone();
            let res = ctx.resources();
            res.stimuli.clear();
            res.experiment.init_stimuli(&trial, &mut res.stimuli);
        }
        Ok(())
    });

    table.set_body(PAUSE, |ctx| {
        if ctx.singleshot("message") {
            let text = ctx.resources().pause_text.clone();
            ctx.stimuli()
                .insert(PAUSE_MESSAGE, StimulusType::text(text), (0.0, 0.0));
            ctx.show(PAUSE_MESSAGE)?;
        }
        if ctx.leaving() {
            ctx.hide(PAUSE_MESSAGE)?;
            ctx.set_trigger(TriggerSchema::pause(), false);
        }
        Ok(())
    });

    table.set_body(END, |ctx| {
        ctx.stimuli().hide_all();
        ctx.stop_own_timers();
        Ok(())
    });
}
