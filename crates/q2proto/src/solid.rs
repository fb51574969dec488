// solid.rs -- bounding box packing for the entity 'solid' field
//
// Boxes are assumed to be centered on the entity in x/y. The z extent does
// not have to be symmetric and the top may be below the origin.

/// Pack a bounding box into 16 bits (vanilla encoding, 8 unit granularity).
pub fn pack_solid_16(mins: &[f32; 3], maxs: &[f32; 3]) -> u16 {
    let x = ((maxs[0] / 8.0) as i32).clamp(1, 31);
    let zd = ((-mins[2] / 8.0) as i32).clamp(1, 31);
    let zu = (((maxs[2] + 32.0) / 8.0) as i32).clamp(1, 63);
    ((zu << 10) | (zd << 5) | x) as u16
}

pub fn unpack_solid_16(solid: u16) -> ([f32; 3], [f32; 3]) {
    let solid = solid as i32;
    let x = 8 * (solid & 31);
    let zd = 8 * ((solid >> 5) & 31);
    let zu = 8 * ((solid >> 10) & 63) - 32;
    (
        [-x as f32, -x as f32, -zd as f32],
        [x as f32, x as f32, zu as f32],
    )
}

/// Pack a bounding box into 32 bits (R1Q2 encoding, 1 unit granularity).
pub fn pack_solid_32_r1q2(mins: &[f32; 3], maxs: &[f32; 3]) -> u32 {
    let x = (maxs[0] as i32).clamp(1, 255) as u32;
    let zd = ((-mins[2]) as i32).clamp(0, 0xff) as u32;
    let zu = ((maxs[2] + 32768.0) as i32).clamp(0, 0xffff) as u32;
    (zu << 16) | (zd << 8) | x
}

pub fn unpack_solid_32_r1q2(solid: u32) -> ([f32; 3], [f32; 3]) {
    let x = (solid & 255) as i32;
    let zd = ((solid >> 8) & 255) as i32;
    let zu = ((solid >> 16) & 65535) as i32 - 32768;
    (
        [-x as f32, -x as f32, -zd as f32],
        [x as f32, x as f32, zu as f32],
    )
}

/// Pack a bounding box into 32 bits (Q2PRO v2 encoding; x and y may differ).
pub fn pack_solid_32_q2pro_v2(mins: &[f32; 3], maxs: &[f32; 3]) -> u32 {
    let x = (maxs[0] as i32).clamp(1, 255) as u32;
    let y = (maxs[1] as i32).clamp(1, 255) as u32;
    let zd = ((-mins[2]) as i32).clamp(0, 255) as u32;
    let zu = ((maxs[2] + 32.0) as i32).clamp(0, 255) as u32;
    (zu << 24) | (zd << 16) | (y << 8) | x
}

pub fn unpack_solid_32_q2pro_v2(solid: u32) -> ([f32; 3], [f32; 3]) {
    let x = (solid & 255) as i32;
    let y = ((solid >> 8) & 255) as i32;
    let zd = ((solid >> 16) & 255) as i32;
    let zu = ((solid >> 24) & 255) as i32 - 32;
    (
        [-x as f32, -y as f32, -zd as f32],
        [x as f32, y as f32, zu as f32],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_MINS: [f32; 3] = [-16.0, -16.0, -24.0];
    const PLAYER_MAXS: [f32; 3] = [16.0, 16.0, 32.0];

    #[test]
    fn test_player_box_16() {
        let packed = pack_solid_16(&PLAYER_MINS, &PLAYER_MAXS);
        assert_eq!(packed, (8 << 10) | (3 << 5) | 2);
        assert_eq!(unpack_solid_16(packed), (PLAYER_MINS, PLAYER_MAXS));
    }

    #[test]
    fn test_player_box_r1q2() {
        let packed = pack_solid_32_r1q2(&PLAYER_MINS, &PLAYER_MAXS);
        assert_eq!(unpack_solid_32_r1q2(packed), (PLAYER_MINS, PLAYER_MAXS));
    }

    #[test]
    fn test_asymmetric_box_q2pro_v2() {
        let mins = [-8.0, -20.0, -4.0];
        let maxs = [8.0, 20.0, -2.0];
        let packed = pack_solid_32_q2pro_v2(&mins, &maxs);
        assert_eq!(unpack_solid_32_q2pro_v2(packed), (mins, maxs));
    }

    #[test]
    fn test_16_bit_clamps() {
        let (mins, maxs) = unpack_solid_16(pack_solid_16(&[-1000.0, -1000.0, -1000.0], &[1000.0, 1000.0, 1000.0]));
        assert_eq!(maxs[0], 248.0);
        assert_eq!(mins[2], -248.0);
        assert_eq!(maxs[2], 8.0 * 63.0 - 32.0);
    }
}
