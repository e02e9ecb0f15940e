mod common;

use crate::common::*;

use libghzdac_rs::board::bringup::{
    BIST_PATTERN_LEN, BringupOptions, BringupReport, bist_pattern, bringup_all, bringup_device,
    check_board,
};
use libghzdac_rs::board::dac::bist_checksum;
use libghzdac_rs::board::{DacBoard, Device};
use libghzdac_rs::{BoardParameters, DacChannel, Error, MAX_FIFO_TRIES, Result};
use std::sync::{Arc, Mutex};

type SimDevice = Device<SimLink, MockAdc>;

#[tokio::test]
async fn lvds_with_fixed_sample_delay() -> Result<()> {
    logging_init("bringup");

    let (dac, _sim) = sim_dac("DAC 1", 1).await;
    let report = dac.set_lvds(DacChannel::A, None, false).await?;
    assert!(report.success);
    assert_eq!(report.sd, 2);
    assert_eq!((report.msd, report.mhd), (5, 5));
    assert_eq!(
        libghzdac_rs::board::dac::LvdsReport::plot(&report.msd_bits),
        "------__________"
    );
    assert_eq!(report.mhd_bits, report.msd_bits);
    assert_eq!(report.check, 0);
    Ok(())
}

#[tokio::test]
async fn lvds_with_optimized_sample_delay() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    let report = dac.set_lvds(DacChannel::B, Some(9), true).await?;
    assert!(report.success);
    // Both delays drop out of the window at step 6.
    assert_eq!((report.msd, report.mhd), (6, 6));
    assert_eq!(report.sd, 0);

    let registers = sim.lock().unwrap().registers();
    assert!(registers.iter().all(|r| r.field(ghzdac_packet::RegisterField::SerialOp) == 3));
    // SD word, two sweeps of 64 words and the final check.
    assert_eq!(registers.len(), 2 * 65 + 1);
    Ok(())
}

#[tokio::test]
async fn lvds_without_board_parameter() {
    logging_init("bringup");

    let (mut dac, _sim) = sim_dac("DAC 1", 1).await;
    dac.set_board_parameters(BoardParameters::default());
    let err = dac.set_lvds(DacChannel::A, None, false).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn fifo_found_after_polarity_flip() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    let report = dac.set_fifo(DacChannel::A, None).await?;
    assert!(report.success);
    assert_eq!(report.tries, 2);
    assert_eq!(report.phof, GOOD_PHOF as i32);
    assert!(report.clock_inverted);
    assert_eq!(report.counter, 3);
    assert_eq!(sim.lock().unwrap().polarity, [true, false]);
    Ok(())
}

#[tokio::test]
async fn fifo_target_never_reached() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    let report = dac.set_fifo(DacChannel::B, Some(9)).await?;
    assert!(!report.success);
    assert_eq!(report.phof, -1);
    assert_eq!(report.tries, MAX_FIFO_TRIES);
    // Five failed tries flip the clock five times.
    assert!(report.clock_inverted);
    assert_eq!(sim.lock().unwrap().polarity, [false, true]);
    Ok(())
}

#[tokio::test]
async fn bist_passes_on_both_channels() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    let pattern = bist_pattern(BIST_PATTERN_LEN);
    for channel in DacChannel::ALL {
        let report = dac.run_bist(channel, &pattern).await?;
        assert!(report.success, "DAC {channel}: {report:x?}");
        assert_eq!(report.expected, bist_checksum(&pattern));
        assert_eq!(report.lvds, report.expected);
    }
    // Four lead-in words ahead of the pattern.
    let sim = sim.lock().unwrap();
    assert_eq!(sim.played().len(), BIST_PATTERN_LEN + 4);
    assert_eq!(sim.played()[4] >> 14, pattern[0]);
    Ok(())
}

#[tokio::test]
async fn bist_accepts_swapped_lanes() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    sim.lock().unwrap().swap_bist_lanes = true;
    let report = dac.run_bist(DacChannel::A, &[1, 2, 3, 4]).await?;
    assert!(report.success);
    assert_eq!(report.fifo, report.expected);

    sim.lock().unwrap().bist_failures = 1;
    let report = dac.run_bist(DacChannel::A, &[1, 2, 3, 4]).await?;
    assert!(!report.success);
    Ok(())
}

#[tokio::test]
async fn dac_bringup_report() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    let device: SimDevice = Device::Dac(dac);
    let report = bringup_device(&device, &BringupOptions::default()).await;
    let BringupReport::Dac {
        name,
        channels,
        ok,
        lvds_ok,
    } = &report
    else {
        panic!("unexpected report {report:?}");
    };
    assert_eq!(name, "DAC 1");
    assert!(*ok && *lvds_ok);
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[1].channel(), DacChannel::B);
    assert!(channels.iter().all(|c| c.fifo.success && c.bist.success));
    assert!(report.is_ok());
    assert!(!report.lvds_warning());
    assert!(!sim.lock().unwrap().pll_unlocked);
    Ok(())
}

#[tokio::test]
async fn check_board_skips_locked_pll() -> Result<()> {
    logging_init("bringup");

    let (dac, sim) = sim_dac("DAC 1", 1).await;
    sim.lock().unwrap().pll_unlocked = false;
    let device: SimDevice = Device::Dac(dac);

    let report = check_board(&device, &BringupOptions::default(), true).await;
    assert!(matches!(report, BringupReport::PllLocked { .. }));
    assert!(report.is_ok());
    assert_eq!(sim.lock().unwrap().frames.len(), 1);

    sim.lock().unwrap().pll_unlocked = true;
    let report = check_board(&device, &BringupOptions::default(), true).await;
    assert!(matches!(report, BringupReport::Dac { ok: true, .. }));
    Ok(())
}

#[tokio::test]
async fn bringup_all_retries_failing_dacs() -> Result<()> {
    logging_init("bringup");

    let (flaky, flaky_sim) = sim_dac("DAC 1", 1).await;
    flaky_sim.lock().unwrap().bist_failures = 1;
    let (good, _) = sim_dac("DAC 2", 2).await;
    let (dead, dead_sim) = sim_dac("DAC 3", 3).await;
    dead_sim.lock().unwrap().broken = true;

    let devices: Vec<SimDevice> = vec![
        Device::Dac(flaky),
        Device::Dac(good),
        Device::Dac(dead),
        Device::Adc(MockAdc {
            name: "ADC 4".to_string(),
            pass: false,
        }),
    ];
    let summary = bringup_all(&devices, &BringupOptions::default()).await;

    assert_eq!(summary.reports.len(), 4);
    assert_eq!(summary.retried, vec![("DAC 1".to_string(), 2)]);
    assert_eq!(summary.failed, vec!["DAC 3".to_string(), "ADC 4".to_string()]);
    assert!(!summary.all_ok());
    assert!(matches!(
        summary.reports[2],
        BringupReport::Exception {
            error: Error::Instrument(_),
            ..
        }
    ));
    assert!(matches!(summary.reports[3], BringupReport::Adc { ok: false, .. }));
    Ok(())
}

#[tokio::test]
async fn adc_boards_run_their_self_test() {
    logging_init("bringup");

    let device: Device<SimLink, MockAdc> = Device::Adc(MockAdc {
        name: "ADC 1".to_string(),
        pass: true,
    });
    assert!(!device.is_dac());
    let report = check_board(&device, &BringupOptions::default(), true).await;
    assert!(matches!(report, BringupReport::Adc { ok: true, .. }));
    assert_eq!(report.name(), "ADC 1");
}

#[tokio::test]
async fn sessions_are_independent() -> Result<()> {
    logging_init("bringup");

    let sim = Arc::new(Mutex::new(SimBoard::new()));
    let dac = DacBoard::from_parts(
        SimLink::new(&sim),
        "DAC 5",
        5,
        FIRMWARE_BUILD as u32,
        Arc::new(build_parameters()),
        board_parameters(),
    )
    .await?;
    let (other, _) = sim_dac("DAC 6", 6).await;
    let (a, b) = tokio::join!(
        dac.set_fifo(DacChannel::A, None),
        other.set_fifo(DacChannel::A, None)
    );
    assert!(a?.success && b?.success);
    Ok(())
}
