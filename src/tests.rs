//! Drive-level tests: channel programs run through `TapeDevice` against
//! images in temporary directories, plus properties shared by every
//! writable image format.

use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use tempfile::{tempdir, TempDir};

use crate::channel::constants::{opcodes, psf_orders, MSET_SUPVR_INHIBIT, MSET_WRITE_IMMED};
use crate::channel::{CcwFlags, CcwOutcome, CcwRequest, DeviceModel, TapeDevice};
use crate::config::DeviceConfig;
use crate::error::{ErrorKind, MediaResult};
use crate::media::codec::AwsHeader;
use crate::media::{open_media, AwsTape, MediaHandler, MediaParameters, TapeFormat, TapePosition};
use crate::sense::{SenseByte0, SenseByte1, UnitStatus};

const NORMAL: UnitStatus = UnitStatus::CE.union(UnitStatus::DE);
const CHECK: UnitStatus = NORMAL.union(UnitStatus::UC);
const TAPEMARK: UnitStatus = NORMAL.union(UnitStatus::UX);

fn drive(model: DeviceModel, dir: &TempDir, name: &str, params: MediaParameters) -> TapeDevice {
    let mut device = TapeDevice::new(model);
    device.mount(dir.path().join(name), &params).unwrap();
    device
}

fn ccw(device: &mut TapeDevice, opcode: u8, count: u16, data: &[u8]) -> (CcwOutcome, Vec<u8>) {
    issue(device, CcwRequest::new(opcode, count), data)
}

fn issue(device: &mut TapeDevice, req: CcwRequest, data: &[u8]) -> (CcwOutcome, Vec<u8>) {
    let mut iobuf = data.to_vec();
    if iobuf.len() < req.count as usize {
        iobuf.resize(req.count as usize, 0);
    }
    let outcome = device.execute(&req, &mut iobuf);
    (outcome, iobuf)
}

fn write(device: &mut TapeDevice, data: &[u8]) -> CcwOutcome {
    ccw(device, opcodes::WRITE, data.len() as u16, data).0
}

fn read(device: &mut TapeDevice, count: u16) -> (CcwOutcome, Vec<u8>) {
    ccw(device, opcodes::READ_FORWARD, count, &[])
}

fn era(outcome: &CcwOutcome) -> u8 {
    outcome.sense[3]
}

// Media-level properties

fn open(dir: &TempDir, name: &str) -> Box<dyn MediaHandler> {
    open_media(dir.path().join(name), &MediaParameters::default()).unwrap()
}

/// Blocks of increasing size with tapemarks (`None`) in between.
fn sample_layout() -> Vec<Option<Vec<u8>>> {
    vec![
        Some(vec![0x11; 100]),
        Some((0..=255u8).collect()),
        None,
        Some(vec![0x22; 1]),
        Some(vec![0x33; 4000]),
        None,
        None,
        Some(vec![0x44; 50]),
    ]
}

fn write_layout(tape: &mut dyn MediaHandler, layout: &[Option<Vec<u8>>]) {
    for item in layout {
        match item {
            Some(block) => tape.write(block).unwrap(),
            None => tape.write_tapemark().unwrap(),
        }
    }
}

#[test]
fn test_round_trip_all_writable_formats() {
    for name in ["round.aws", "round.fkt"] {
        let dir = tempdir().unwrap();
        let mut tape = open(&dir, name);
        let layout = sample_layout();
        write_layout(tape.as_mut(), &layout);
        tape.rewind().unwrap();

        for item in &layout {
            let mut buf = Vec::new();
            let len = tape.read(&mut buf).unwrap();
            match item {
                Some(block) => {
                    assert_eq!(len, block.len(), "{}", name);
                    assert_eq!(&buf, block, "{}", name);
                }
                None => assert_eq!(len, 0, "{}", name),
            }
        }
        assert_eq!(tape.read(&mut Vec::new()), Err(ErrorKind::EmptyTape), "{}", name);
    }
}

#[test]
fn test_position_symmetry_all_writable_formats() {
    for name in ["sym.aws", "sym.fkt"] {
        let dir = tempdir().unwrap();
        let mut tape = open(&dir, name);
        write_layout(tape.as_mut(), &sample_layout());
        tape.rewind().unwrap();

        let mut forward: Vec<TapePosition> = vec![*tape.position()];
        while tape.space_block_forward().is_ok() {
            forward.push(*tape.position());
        }
        assert_eq!(forward.len(), sample_layout().len() + 1, "{}", name);

        let end = *tape.position();
        tape.space_block_backward().unwrap();
        tape.space_block_forward().unwrap();
        assert_eq!(*tape.position(), end, "{}", name);

        for expected in forward.iter().rev().skip(1) {
            tape.space_block_backward().unwrap();
            assert_eq!(tape.position().next_block_pos, expected.next_block_pos, "{}", name);
            assert_eq!(tape.position().block_id, expected.block_id, "{}", name);
            assert_eq!(tape.position().cur_file_num, expected.cur_file_num, "{}", name);
        }
        assert!(tape.at_load_point());
        assert_eq!(tape.space_block_backward(), Err(ErrorKind::LoadPointError), "{}", name);
    }
}

#[test]
fn test_locate_matches_spacing() {
    for name in ["loc.aws", "loc.fkt"] {
        let dir = tempdir().unwrap();
        let mut tape = open(&dir, name);
        write_layout(tape.as_mut(), &sample_layout());

        for target in 0..=sample_layout().len() as u32 {
            tape.rewind().unwrap();
            for _ in 0..target {
                tape.space_block_forward().unwrap();
            }
            let spaced = *tape.position();

            tape.locate_block(target).unwrap();
            assert_eq!(*tape.position(), spaced, "{} block {}", name, target);
        }
    }
}

#[test]
fn test_file_spacing_counts_files() {
    let dir = tempdir().unwrap();
    let mut tape = open(&dir, "files.aws");
    write_layout(tape.as_mut(), &sample_layout());
    tape.rewind().unwrap();

    tape.space_file_forward().unwrap();
    assert_eq!(tape.position().cur_file_num, 2);
    assert_eq!(tape.position().block_id, 3);
    tape.space_file_forward().unwrap();
    tape.space_file_forward().unwrap();
    assert_eq!(tape.position().cur_file_num, 4);

    let mut buf = Vec::new();
    assert_eq!(tape.read(&mut buf), Ok(50));

    tape.space_file_backward().unwrap();
    assert_eq!(tape.position().cur_file_num, 3);
}

#[test]
fn test_detected_formats_mount_as_expected() {
    let dir = tempdir().unwrap();
    assert_eq!(open(&dir, "a.aws").format(), TapeFormat::Aws);
    assert_eq!(open(&dir, "b.fkt").format(), TapeFormat::FakeTape);

    std::fs::write(dir.path().join("d.bin"), [0x40u8; 8]).unwrap();
    std::fs::write(dir.path().join("v.tdf"), "@TDF\nd.bin FIXED RECSIZE 4\n").unwrap();
    let oma = open(&dir, "v.tdf");
    assert_eq!(oma.format(), TapeFormat::Oma);
    assert!(oma.is_read_only());
}

// Channel programs

#[test]
fn test_empty_image_reports_tape_void() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "empty.aws", MediaParameters::default());

    let (outcome, _) = read(&mut device, 80);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(outcome.residual, 80);
    assert_eq!(SenseByte0::from_bits_retain(outcome.sense[0]), SenseByte0::DC);
    assert_eq!(era(&outcome), 0x31);
    assert!(device.is_sense_pending());
}

#[test]
fn test_write_tapemark_and_read_back() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "rw.aws", MediaParameters::default());

    assert_eq!(write(&mut device, &[0xC1; 100]).status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::WRITE_TAPEMARK, 0, &[]).0.status, NORMAL);
    assert_eq!(write(&mut device, &[0xC2; 50]).status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::REWIND, 0, &[]).0.status, NORMAL);

    let (outcome, data) = read(&mut device, 200);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(outcome.residual, 100);
    assert!(!outcome.more);
    assert_eq!(&data[..100], &[0xC1; 100][..]);

    let (outcome, _) = read(&mut device, 200);
    assert_eq!(outcome.status, TAPEMARK);
    assert_eq!(outcome.residual, 200);
    assert!(!device.is_sense_pending());

    let (outcome, data) = read(&mut device, 20);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(outcome.residual, 0);
    assert!(outcome.more);
    assert_eq!(data, vec![0xC2; 20]);

    let (outcome, _) = read(&mut device, 20);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x31);
}

#[test]
fn test_fake_tape_through_channel() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3480, &dir, "vol.fkt", MediaParameters::default());
    write(&mut device, &[0x55; 100]);

    let image = std::fs::read(dir.path().join("vol.fkt")).unwrap();
    assert_eq!(&image[..12], b"000000640064");
    assert_eq!(image.len(), 112);
}

#[test]
fn test_oma_volume_through_channel() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin"), [0xF0u8; 85]).unwrap();
    std::fs::write(dir.path().join("vol.tdf"), "@TDF\ndata.bin FIXED RECSIZE 80\n").unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "vol.tdf", MediaParameters::default());

    let (outcome, _) = read(&mut device, 100);
    assert_eq!((outcome.status, outcome.residual), (NORMAL, 20));
    let (outcome, _) = read(&mut device, 100);
    assert_eq!((outcome.status, outcome.residual), (NORMAL, 95));
    let (outcome, _) = read(&mut device, 100);
    assert_eq!(outcome.status, TAPEMARK);

    let (outcome, _) = read(&mut device, 100);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x38);

    let outcome = write(&mut device, &[0; 10]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x30);
    assert!(SenseByte1::from_bits_retain(outcome.sense[1]).contains(SenseByte1::FP | SenseByte1::TUA));
}

#[test]
fn test_capacity_reported_without_fencing() {
    let dir = tempdir().unwrap();
    let params = MediaParameters {
        max_size: 30,
        ..Default::default()
    };
    let mut device = drive(DeviceModel::Ibm3490, &dir, "cap.aws", params);

    assert_eq!(write(&mut device, &[0; 14]).status, NORMAL);
    let before = *device.media().unwrap().position();

    let outcome = write(&mut device, &[0; 14]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x38);
    assert_eq!(*device.media().unwrap().position(), before);
    assert!(!device.media().unwrap().position().fenced);
}

#[test]
fn test_corrupt_block_is_data_check() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.aws");
    let mut image = AwsHeader::block(100, 0).to_bytes().to_vec();
    image.extend_from_slice(&[0; 40]);
    std::fs::write(&path, &image).unwrap();

    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    device.mount(&path, &MediaParameters::default()).unwrap();
    let (outcome, _) = read(&mut device, 100);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x36);
    assert!(device.media().unwrap().position().at_load_point());
    assert_eq!(std::fs::read(&path).unwrap(), image);
}

#[test]
fn test_sense_pending_then_unsolicited() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);

    let (outcome, _) = read(&mut device, 80);
    assert_eq!(outcome.status, UnitStatus::CE | UnitStatus::UC);
    assert!(device.is_sense_pending());

    let (outcome, sense) = ccw(&mut device, opcodes::SENSE, 32, &[]);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(outcome.residual, 0);
    assert_eq!(SenseByte0::from_bits_retain(sense[0]), SenseByte0::IR);
    assert_eq!(SenseByte1::from_bits_retain(sense[1]), SenseByte1::TUB);
    assert_eq!(sense[3], 0x43);
    assert_eq!(sense[7], 0x20);
    assert!(!device.is_sense_pending());

    let (_, sense) = ccw(&mut device, opcodes::SENSE, 32, &[]);
    assert_eq!(sense[0], 0);
    assert_eq!(sense[3], 0x2A);
}

#[test]
fn test_unloaded_status_by_opcode() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    assert_eq!(ccw(&mut device, opcodes::NOP, 0, &[]).0.status, UnitStatus::UC);
    assert_eq!(ccw(&mut device, opcodes::REWIND, 0, &[]).0.status, CHECK);
    assert_eq!(write(&mut device, &[1]).status, UnitStatus::CE | UnitStatus::UC);

    device.set_deonirq(true);
    assert_eq!(write(&mut device, &[1]).status, CHECK);
}

#[test]
fn test_unsupported_opcode_rejected() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3420, &dir, "reel.aws", MediaParameters::default());

    let (outcome, _) = ccw(&mut device, opcodes::READ_BLOCK_ID, 8, &[]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(outcome.sense.len(), 24);
    assert_eq!(SenseByte0::from_bits_retain(outcome.sense[0]), SenseByte0::CR);

    assert_eq!(ccw(&mut device, 0xFF, 0, &[]).0.status, CHECK);
}

#[test]
fn test_simple_family_no_ops() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3420);
    assert_eq!(ccw(&mut device, opcodes::NOP, 0, &[]).0.status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::MODE_SET_1600, 1, &[0]).0.status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::ERASE_GAP, 0, &[]).0.status, NORMAL);
}

#[test]
fn test_failed_locate_fences_until_reset() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "fence.aws", MediaParameters::default());
    write(&mut device, &[1; 10]);
    write(&mut device, &[2; 10]);

    let mut target = [0u8; 4];
    BigEndian::write_u32(&mut target, 5);
    let (outcome, _) = ccw(&mut device, opcodes::LOCATE_BLOCK, 4, &target);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x44);
    assert!(device.media().unwrap().position().fenced);

    let outcome = write(&mut device, &[3; 10]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x47);
    assert_eq!(read(&mut device, 10).0.status, CHECK);

    let order = [psf_orders::RESET_VOLUME_FENCED];
    assert_eq!(ccw(&mut device, opcodes::PERFORM_SUBSYSTEM_FUNCTION, 1, &order).0.status, NORMAL);
    assert!(!device.media().unwrap().position().fenced);

    BigEndian::write_u32(&mut target, 1);
    let (outcome, _) = ccw(&mut device, opcodes::LOCATE_BLOCK, 4, &target);
    assert_eq!(outcome.status, NORMAL);
    let (outcome, data) = read(&mut device, 10);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(data, vec![2; 10]);
}

#[test]
fn test_rewind_clears_fence() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "fence.aws", MediaParameters::default());
    write(&mut device, &[1; 10]);

    let target = [0, 0, 0, 9];
    assert_eq!(ccw(&mut device, opcodes::LOCATE_BLOCK, 4, &target).0.status, CHECK);
    assert_eq!(ccw(&mut device, opcodes::REWIND, 0, &[]).0.status, NORMAL);
    assert!(!device.media().unwrap().position().fenced);
    assert_eq!(read(&mut device, 10).0.status, NORMAL);
}

#[test]
fn test_read_block_id_and_locate() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "ids.aws", MediaParameters::default());
    write(&mut device, &[1; 10]);
    ccw(&mut device, opcodes::WRITE_TAPEMARK, 0, &[]);
    write(&mut device, &[2; 10]);

    let (outcome, data) = ccw(&mut device, opcodes::READ_BLOCK_ID, 8, &[]);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(data, vec![0, 0, 0, 3, 0, 0, 0, 3]);

    ccw(&mut device, opcodes::LOCATE_BLOCK, 4, &data[..4]);
    assert_eq!(device.media().unwrap().position().block_id, 3);
    ccw(&mut device, opcodes::LOCATE_BLOCK, 4, &[0, 0, 0, 1]);
    assert_eq!(device.media().unwrap().position().cur_file_num, 1);
    assert_eq!(read(&mut device, 10).0.status, TAPEMARK);
}

#[test]
fn test_spacing_commands() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "space.aws", MediaParameters::default());
    write(&mut device, &[1; 10]);
    ccw(&mut device, opcodes::WRITE_TAPEMARK, 0, &[]);
    write(&mut device, &[2; 10]);
    ccw(&mut device, opcodes::REWIND, 0, &[]);

    assert_eq!(ccw(&mut device, opcodes::FORWARD_SPACE_BLOCK, 0, &[]).0.status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::FORWARD_SPACE_BLOCK, 0, &[]).0.status, TAPEMARK);
    assert_eq!(ccw(&mut device, opcodes::BACKSPACE_BLOCK, 0, &[]).0.status, TAPEMARK);
    assert_eq!(ccw(&mut device, opcodes::BACKSPACE_BLOCK, 0, &[]).0.status, NORMAL);

    let outcome = ccw(&mut device, opcodes::BACKSPACE_BLOCK, 0, &[]).0;
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x39);
    assert!(SenseByte1::from_bits_retain(outcome.sense[1]).contains(SenseByte1::LOADPT));

    assert_eq!(ccw(&mut device, opcodes::FORWARD_SPACE_FILE, 0, &[]).0.status, NORMAL);
    assert_eq!(read(&mut device, 10).1, vec![2; 10]);
    assert_eq!(ccw(&mut device, opcodes::BACKSPACE_FILE, 0, &[]).0.status, NORMAL);
    assert_eq!(device.media().unwrap().position().block_id, 1);
}

#[test]
fn test_read_backward_delivers_block_tail() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "back.aws", MediaParameters::default());
    write(&mut device, b"AAAA");
    write(&mut device, b"BBBCCC");

    let (outcome, data) = ccw(&mut device, opcodes::READ_BACKWARD, 3, &[]);
    assert_eq!(outcome.status, NORMAL);
    assert!(outcome.more);
    assert_eq!(data, b"CCC".to_vec());
    assert_eq!(device.media().unwrap().position().block_id, 1);

    let (outcome, data) = ccw(&mut device, opcodes::READ_BACKWARD, 10, &[]);
    assert_eq!((outcome.status, outcome.residual), (NORMAL, 6));
    assert_eq!(&data[..4], b"AAAA");

    let outcome = ccw(&mut device, opcodes::READ_BACKWARD, 10, &[]).0;
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x39);
}

#[test]
fn test_data_chained_write_is_one_block() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "chain.aws", MediaParameters::default());

    let mut first = CcwRequest::new(opcodes::WRITE, 3);
    first.flags = CcwFlags::CD;
    let (outcome, _) = issue(&mut device, first, b"ABC");
    assert!(outcome.status.is_empty());

    let second = CcwRequest {
        chained: true,
        prev_opcode: opcodes::WRITE,
        seq: 1,
        ..CcwRequest::new(opcodes::WRITE, 2)
    };
    assert_eq!(issue(&mut device, second, b"DE").0.status, NORMAL);

    ccw(&mut device, opcodes::REWIND, 0, &[]);
    let (outcome, data) = read(&mut device, 10);
    assert_eq!(outcome.residual, 5);
    assert_eq!(&data[..5], b"ABCDE");
    assert_eq!(read(&mut device, 10).0.status, CHECK);
}

#[test]
fn test_data_chained_read_continues_block() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "chain.aws", MediaParameters::default());
    write(&mut device, b"0123456789");
    write(&mut device, b"next");
    ccw(&mut device, opcodes::REWIND, 0, &[]);

    let mut first = CcwRequest::new(opcodes::READ_FORWARD, 4);
    first.flags = CcwFlags::CD;
    let (outcome, data) = issue(&mut device, first, &[]);
    assert!(outcome.status.is_empty());
    assert!(outcome.more);
    assert_eq!(data, b"0123".to_vec());

    let second = CcwRequest {
        chained: true,
        prev_opcode: opcodes::READ_FORWARD,
        seq: 1,
        ..CcwRequest::new(opcodes::READ_FORWARD, 10)
    };
    let (outcome, data) = issue(&mut device, second, &[]);
    assert_eq!((outcome.status, outcome.residual), (NORMAL, 4));
    assert_eq!(&data[..6], b"456789");

    let (_, data) = read(&mut device, 4);
    assert_eq!(data, b"next".to_vec());
}

#[test]
fn test_mode_set_applies_to_chain() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);

    let (outcome, _) = ccw(&mut device, opcodes::MODE_SET, 1, &[MSET_SUPVR_INHIBIT | MSET_WRITE_IMMED]);
    assert_eq!(outcome.status, NORMAL);
    assert!(device.chain_state().supervisor_inhibit);
    assert!(device.chain_state().write_immediate);

    let psf = CcwRequest {
        seq: 1,
        prev_opcode: opcodes::MODE_SET,
        ..CcwRequest::new(opcodes::PERFORM_SUBSYSTEM_FUNCTION, 1)
    };
    let (outcome, _) = issue(&mut device, psf, &[psf_orders::FORCED_ERROR_LOGGING]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x27);

    let (outcome, _) = ccw(&mut device, opcodes::PERFORM_SUBSYSTEM_FUNCTION, 1, &[psf_orders::FORCED_ERROR_LOGGING]);
    assert_eq!(outcome.status, NORMAL);
    assert!(!device.chain_state().supervisor_inhibit);
}

#[test]
fn test_write_immediate_write() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "imm.aws", MediaParameters::default());
    ccw(&mut device, opcodes::MODE_SET, 1, &[MSET_WRITE_IMMED]);
    let req = CcwRequest {
        seq: 1,
        ..CcwRequest::new(opcodes::WRITE, 4)
    };
    assert_eq!(issue(&mut device, req, b"SYNC").0.status, NORMAL);
    assert_eq!(std::fs::metadata(dir.path().join("imm.aws")).unwrap().len(), 10);
}

#[test]
fn test_subsystem_data_staged_for_next_ccw_only() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    let prepare = [psf_orders::PREPARE_FOR_READ_SUBSYSTEM_DATA, 0x03];

    assert_eq!(ccw(&mut device, opcodes::PERFORM_SUBSYSTEM_FUNCTION, 2, &prepare).0.status, NORMAL);
    let rsd = CcwRequest {
        seq: 1,
        ..CcwRequest::new(opcodes::READ_SUBSYSTEM_DATA, 32)
    };
    let (outcome, data) = issue(&mut device, rsd, &[]);
    assert_eq!((outcome.status, outcome.residual), (NORMAL, 0));
    assert_eq!(BigEndian::read_u16(&data[0..2]), 32);
    assert_eq!(data[3], 0x03);
    assert_eq!(BigEndian::read_u16(&data[4..6]), 0x3490);

    let again = CcwRequest { seq: 2, ..rsd };
    assert_eq!(issue(&mut device, again, &[]).0.status, CHECK);

    ccw(&mut device, opcodes::PERFORM_SUBSYSTEM_FUNCTION, 2, &prepare);
    let sense_id = CcwRequest {
        seq: 1,
        ..CcwRequest::new(opcodes::SENSE_ID, 7)
    };
    issue(&mut device, sense_id, &[]);
    let late = CcwRequest { seq: 2, ..rsd };
    assert_eq!(issue(&mut device, late, &[]).0.status, CHECK);
}

#[test]
fn test_rewind_unload_empties_drive() {
    let dir = tempdir().unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "run.aws", MediaParameters::default());
    write(&mut device, &[1; 10]);

    let (outcome, _) = ccw(&mut device, opcodes::REWIND_UNLOAD, 0, &[]);
    assert_eq!(outcome.status, NORMAL);
    assert!(device.media().is_none());

    let outcome = write(&mut device, &[1; 10]);
    assert_eq!(outcome.status, UnitStatus::CE | UnitStatus::UC);
    assert_eq!(era(&outcome), 0x43);
}

#[test]
fn test_read_only_mount_rejects_writes() {
    let dir = tempdir().unwrap();
    let params = MediaParameters {
        logical_readonly: true,
        ..Default::default()
    };
    std::fs::write(dir.path().join("ro.aws"), b"").unwrap();
    let mut device = drive(DeviceModel::Ibm3490, &dir, "ro.aws", params);

    for opcode in [opcodes::WRITE, opcodes::WRITE_TAPEMARK, opcodes::ERASE_GAP, opcodes::DATA_SECURITY_ERASE] {
        let (outcome, _) = ccw(&mut device, opcode, 1, &[0]);
        assert_eq!(outcome.status, CHECK, "opcode 0x{:02X}", opcode);
        assert_eq!(era(&outcome), 0x30);
        let byte1 = SenseByte1::from_bits_retain(outcome.sense[1]);
        assert_eq!(byte1, SenseByte1::TUA | SenseByte1::LOADPT | SenseByte1::FP);
    }
}

#[test]
fn test_sense_id_and_characteristics() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    let (outcome, data) = ccw(&mut device, opcodes::SENSE_ID, 7, &[]);
    assert_eq!(outcome.status, NORMAL);
    assert_eq!(data, vec![0xFF, 0x34, 0x90, 0x50, 0x34, 0x90, 0x50]);

    let (outcome, data) = ccw(&mut device, opcodes::READ_DEVICE_CHARACTERISTICS, 64, &[]);
    assert_eq!(outcome.residual, 0);
    assert_eq!(&data[..6], &[0x34, 0x90, 0x50, 0x34, 0x90, 0x50]);

    let (outcome, _) = ccw(&mut device, opcodes::SENSE_ID, 20, &[]);
    assert_eq!(outcome.residual, 13);
}

#[test]
fn test_path_group_round_trip() {
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    let mut set = vec![0x80];
    set.extend_from_slice(&[0xAB; 11]);
    assert_eq!(ccw(&mut device, opcodes::SET_PATH_GROUP_ID, 12, &set).0.status, NORMAL);

    let (_, data) = ccw(&mut device, opcodes::SENSE_PATH_GROUP_ID, 12, &[]);
    assert_eq!(data, set);
}

#[test]
fn test_early_warning_reported_and_cleared_by_rewind() {
    let dir = tempdir().unwrap();
    let params = MediaParameters {
        max_size: 1000,
        eot_margin: 500,
        ..Default::default()
    };
    let mut device = drive(DeviceModel::Ibm3490, &dir, "eot.aws", params);

    assert_eq!(write(&mut device, &[0; 100]).status, NORMAL);
    assert_eq!(write(&mut device, &[0; 500]).status, TAPEMARK);
    assert!(device.media().unwrap().position().eot_warning);

    assert_eq!(ccw(&mut device, opcodes::REWIND, 0, &[]).0.status, NORMAL);
    assert!(!device.media().unwrap().position().eot_warning);
}

#[test]
fn test_early_warning_at_load_point() {
    let dir = tempdir().unwrap();
    let params = MediaParameters {
        max_size: 100,
        eot_margin: 150,
        ..Default::default()
    };
    let mut device = drive(DeviceModel::Ibm3490, &dir, "bot.aws", params);

    assert_eq!(ccw(&mut device, opcodes::ERASE_GAP, 0, &[]).0.status, TAPEMARK);
    assert!(device.media().unwrap().at_load_point());
    assert!(device.media().unwrap().position().eot_warning);
}

/// AWS image whose rewind always fails.
struct StuckTape(AwsTape);

impl MediaHandler for StuckTape {
    fn format(&self) -> TapeFormat {
        self.0.format()
    }
    fn path(&self) -> &Path {
        self.0.path()
    }
    fn params(&self) -> &MediaParameters {
        self.0.params()
    }
    fn position(&self) -> &TapePosition {
        self.0.position()
    }
    fn position_mut(&mut self) -> &mut TapePosition {
        self.0.position_mut()
    }
    fn open(&mut self) -> MediaResult<()> {
        self.0.open()
    }
    fn close(&mut self) {
        self.0.close()
    }
    fn query_loaded(&self) -> bool {
        self.0.query_loaded()
    }
    fn is_read_only(&self) -> bool {
        self.0.is_read_only()
    }
    fn read(&mut self, buf: &mut Vec<u8>) -> MediaResult<usize> {
        self.0.read(buf)
    }
    fn write(&mut self, data: &[u8]) -> MediaResult<()> {
        self.0.write(data)
    }
    fn write_tapemark(&mut self) -> MediaResult<()> {
        self.0.write_tapemark()
    }
    fn rewind(&mut self) -> MediaResult<()> {
        Err(ErrorKind::InterfaceError)
    }
    fn space_block_forward(&mut self) -> MediaResult<usize> {
        self.0.space_block_forward()
    }
    fn space_block_backward(&mut self) -> MediaResult<usize> {
        self.0.space_block_backward()
    }
    fn sync(&mut self) -> MediaResult<()> {
        self.0.sync()
    }
    fn erase_gap(&mut self) -> MediaResult<()> {
        self.0.erase_gap()
    }
    fn secure_erase(&mut self) -> MediaResult<()> {
        self.0.secure_erase()
    }
}

#[test]
fn test_failed_rewind_keeps_warning_and_fences() {
    let dir = tempdir().unwrap();
    let params = MediaParameters {
        max_size: 1000,
        eot_margin: 500,
        ..Default::default()
    };
    let mut inner = AwsTape::new(dir.path().join("stuck.aws"), params);
    inner.open().unwrap();
    let mut device = TapeDevice::new(DeviceModel::Ibm3490);
    device.mount_handler(Box::new(StuckTape(inner)));

    assert_eq!(write(&mut device, &[0; 600]).status, TAPEMARK);

    let (outcome, _) = ccw(&mut device, opcodes::REWIND, 0, &[]);
    assert_eq!(outcome.status, CHECK);
    assert_eq!(era(&outcome), 0x2C);
    let position = *device.media().unwrap().position();
    assert!(position.eot_warning);
    assert!(position.fenced);
    assert_eq!(position.block_id, 1);

    assert_eq!(era(&write(&mut device, &[0; 10])), 0x47);
}

#[test]
fn test_device_from_config() {
    let dir = tempdir().unwrap();
    let image: PathBuf = dir.path().join("cfg.fkt");
    let mut config = DeviceConfig::new(DeviceModel::Ibm9347);
    config.image = Some(image.clone());
    config.deonirq = true;

    let mut device = TapeDevice::from_config(&config).unwrap();
    assert_eq!(device.model(), DeviceModel::Ibm9347);
    assert_eq!(device.media().unwrap().format(), TapeFormat::FakeTape);
    assert_eq!(write(&mut device, b"streaming").status, NORMAL);
    assert_eq!(ccw(&mut device, opcodes::READ_BLOCK_ID, 8, &[]).0.status, CHECK);

    device.mount("*", &MediaParameters::default()).unwrap();
    assert!(device.media().is_none());
    assert_eq!(read(&mut device, 10).0.status, CHECK);
}
