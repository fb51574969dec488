// sound.rs -- conversion between svc_sound messages and engine sound parameters

use crate::coords::Coord;
use crate::defs::{
    SND_ATTENUATION, SND_ENT, SND_OFFSET, SND_POS, SND_Q2PRO_INDEX16, SND_VOLUME, SOUND_DEFAULT_ATTENUATION,
    SOUND_DEFAULT_VOLUME,
};
use crate::svc::Sound;

/// Sound parameters as engines usually keep them.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SoundParams {
    pub has_entity_channel: bool,
    pub has_position: bool,
    pub index: u16,
    pub entity: u16,
    pub channel: u8,
    pub pos: [f32; 3],
    /// 0..1
    pub volume: f32,
    pub attenuation: f32,
    /// Seconds
    pub timeofs: f32,
}

/// Loop attenuation value meaning "no attenuation".
pub const ATTN_LOOP_NONE: f32 = -1.0;
const ENCODE_LOOP_NONE: u8 = 192;

/// Expand a received sound message, filling in the defaults for absent fields.
pub fn decode_message(msg: &Sound) -> SoundParams {
    let mut params = SoundParams {
        index: msg.index,
        ..Default::default()
    };
    if msg.flags & SND_ENT != 0 {
        params.has_entity_channel = true;
        params.entity = msg.entity;
        params.channel = msg.channel;
    }
    if msg.flags & SND_POS != 0 {
        params.has_position = true;
        params.pos = [msg.pos[0].to_float(), msg.pos[1].to_float(), msg.pos[2].to_float()];
    }
    let volume = if msg.flags & SND_VOLUME != 0 { msg.volume } else { SOUND_DEFAULT_VOLUME };
    params.volume = volume as f32 / 255.0;
    let attenuation = if msg.flags & SND_ATTENUATION != 0 {
        msg.attenuation
    } else {
        SOUND_DEFAULT_ATTENUATION
    };
    params.attenuation = attenuation as f32 / 64.0;
    if msg.flags & SND_OFFSET != 0 {
        params.timeofs = msg.timeofs as f32 / 1000.0;
    }
    params
}

/// Build a sound message, setting only the flags needed for non-default values.
pub fn encode_message(params: &SoundParams) -> Sound {
    let mut msg = Sound {
        index: params.index,
        ..Default::default()
    };
    if msg.index > 255 {
        msg.flags |= SND_Q2PRO_INDEX16;
    }
    if params.has_entity_channel {
        msg.entity = params.entity;
        msg.channel = params.channel;
        msg.flags |= SND_ENT;
    }
    if params.has_position {
        msg.pos = params.pos.map(Coord::Float);
        msg.flags |= SND_POS;
    }
    let volume = ((params.volume * 255.0) as i32).clamp(0, 255) as u8;
    if volume != SOUND_DEFAULT_VOLUME {
        msg.volume = volume;
        msg.flags |= SND_VOLUME;
    }
    let attenuation = ((params.attenuation * 64.0) as i32).clamp(0, 255) as u8;
    if attenuation != SOUND_DEFAULT_ATTENUATION {
        msg.attenuation = attenuation;
        msg.flags |= SND_ATTENUATION;
    }
    let timeofs = ((params.timeofs * 1000.0) as i32).clamp(0, 255) as u8;
    if timeofs != 0 {
        msg.timeofs = timeofs;
        msg.flags |= SND_OFFSET;
    }
    msg
}

/// Decode an entity loop attenuation. 0 stands for the static default.
pub fn decode_loop_attenuation(value: u8) -> f32 {
    if value == ENCODE_LOOP_NONE {
        ATTN_LOOP_NONE
    } else {
        value as f32 / 64.0
    }
}

/// Encode an entity loop attenuation. Static attenuation (3.0) travels as 0.
pub fn encode_loop_attenuation(attenuation: f32) -> u8 {
    if attenuation == ATTN_LOOP_NONE {
        return ENCODE_LOOP_NONE;
    }
    let value = (attenuation * 64.0).clamp(0.0, 255.0) as u8;
    if value == ENCODE_LOOP_NONE {
        0
    } else {
        value
    }
}
