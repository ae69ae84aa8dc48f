//! Device setup and channel configuration.

mod common;

use common::*;
use qcom_adm::{
    channel::{Crci, SlaveConfig, Status},
    ral::{Register, CHANNELS},
    CiBurst, ClientInterface, Config, Error,
};

#[test]
fn init_programs_defaults() {
    let adm = adm();
    let regs = adm.registers();
    adm.init(&Config::default());

    for crci in 0..CHANNELS {
        assert_eq!(regs.writes_to(Register::CrciCtl(crci)), [1 << 17]);
    }
    assert_eq!(
        regs.writes_to(Register::ClientConf(0)),
        [0xb0 << 24 | 0x40 << 16 | 8]
    );
    assert_eq!(
        regs.writes_to(Register::ClientConf(1)),
        [0x2c << 24 | 0x2a << 16 | 8]
    );
    assert_eq!(
        regs.writes_to(Register::ClientConf(2)),
        [0x28 << 24 | 0x12 << 16 | 8]
    );
    assert_eq!(regs.writes_to(Register::GpCtl), [1 << 12 | 0xf << 8]);
}

#[test]
fn init_uses_config() {
    let adm = adm();
    let mut config = Config::default();
    config.client_interfaces[1] = ClientInterface {
        range_start: 0x01,
        range_end: 0x02,
        burst: CiBurst::Words4,
    };
    config.loop_count = 0x3;
    adm.init(&config);

    let regs = adm.registers();
    assert_eq!(
        regs.writes_to(Register::ClientConf(1)),
        [0x02 << 24 | 0x01 << 16 | 4]
    );
    assert_eq!(regs.writes_to(Register::GpCtl), [1 << 12 | 0x3 << 8]);
}

#[test]
fn init_reprograms_channels() {
    let adm = adm();
    let regs = adm.registers();
    adm.init(&Config::default());
    let channel = flow_controlled(&adm, 1, 1);

    prep(&channel, 16);
    channel.issue_pending();
    complete(&adm, 1);
    assert_eq!(regs.writes_to(Register::ChannelConf(1)).len(), 1);

    adm.init(&Config::default());
    prep(&channel, 16);
    channel.issue_pending();
    assert_eq!(regs.writes_to(Register::ChannelConf(1)).len(), 2);
}

#[test]
fn shutdown_quiesces_every_channel() {
    let adm = adm();
    let regs = adm.registers();
    let channel = flow_controlled(&adm, 14, 2);
    let running = prep(&channel, 16);
    channel.issue_pending();
    prep(&channel, 16);
    regs.take_log();

    adm.shutdown();
    for index in 0..CHANNELS {
        assert_eq!(regs.writes_to(Register::ChannelConf(index)), [1 << 8]);
        assert_eq!(regs.writes_to(Register::ResultConf(index)), [1 << 1]);
        assert_eq!(regs.writes_to(Register::FlushState(index)), [0]);
    }
    assert_eq!(adm.memory().live(), 0);
    assert_eq!(channel.status(running).status, Status::InProgress);

    // Channels come back after another init.
    adm.init(&Config::default());
    regs.take_log();
    let cookie = prep(&channel, 16);
    channel.issue_pending();
    assert_eq!(regs.writes_to(Register::ChannelConf(14)), [0xbc0]);
    complete(&adm, 14);
    assert_eq!(channel.status(cookie).status, Status::Complete);
}

#[test]
fn translate_binds_crci() {
    let adm = adm();

    let channel = adm.translate(&[3, 0x15]).unwrap();
    assert_eq!(channel.index(), 3);
    assert_eq!(channel.crci(), Crci::new(5, true));

    let channel = adm.translate(&[15, 0x9]).unwrap();
    assert_eq!(channel.index(), 15);
    assert_eq!(channel.crci(), Crci::new(9, false));

    let channel = adm.translate(&[4, 0]).unwrap();
    assert_eq!(channel.crci(), None);
}

#[test]
fn translate_rejects_bad_bindings() {
    let adm = adm();
    assert!(adm.translate(&[16, 1]).is_none());
    assert!(adm.translate(&[u32::MAX, 1]).is_none());
    assert!(adm.translate(&[1]).is_none());
    assert!(adm.translate(&[1, 2, 3]).is_none());
    assert!(adm.translate(&[]).is_none());
}

#[test]
#[should_panic]
fn channel_index_out_of_range() {
    let adm = adm();
    adm.channel(CHANNELS);
}

#[test]
fn configure_selects_block_size() {
    let adm = adm();
    let regs = adm.registers();
    let channel = adm.translate(&[7, 0x13]).unwrap();

    for (burst, code) in [(16, 0), (32, 1), (64, 2), (128, 3), (192, 4), (256, 5)] {
        channel
            .configure(SlaveConfig {
                dst_addr: DEVICE,
                src_maxburst: 0,
                dst_maxburst: burst,
                device_fc: true,
                ..SlaveConfig::default()
            })
            .unwrap();
        regs.take_log();

        prep(&channel, 2 * burst);
        channel.issue_pending();
        assert_eq!(
            regs.writes_to(Register::CrciCtl(3)),
            [1 << 18 | code],
            "burst {burst}"
        );
        complete(&adm, 7);
    }
}

#[test]
fn configure_rejects_unsupported_bursts() {
    let adm = adm();
    let regs = adm.registers();
    let channel = adm.translate(&[8, 0x4]).unwrap();
    let good = SlaveConfig {
        src_addr: DEVICE,
        src_maxburst: 64,
        device_fc: true,
        ..SlaveConfig::default()
    };
    channel.configure(good).unwrap();

    for burst in [0, 8, 100, 512, 16_384] {
        let bad = SlaveConfig {
            src_maxburst: burst,
            ..good
        };
        assert_eq!(channel.configure(bad), Err(Error::UnsupportedBurst(burst)));
    }

    // The last good configuration is still in place.
    let fragments = [qcom_adm::descriptor::Fragment::new(0x8000_0000, 128)];
    unsafe {
        channel.prep_slave_sg(
            &fragments,
            qcom_adm::descriptor::Direction::DevToMem,
            irq(),
        )
    }
    .unwrap();
    channel.issue_pending();
    assert_eq!(regs.writes_to(Register::CrciCtl(4)), [2]);
}

#[test]
fn unbound_channels_accept_any_burst() {
    let adm = adm();
    let channel = adm.channel(0);
    let config = SlaveConfig {
        src_maxburst: 100,
        dst_maxburst: 100,
        device_fc: true,
        ..SlaveConfig::default()
    };
    assert_eq!(channel.configure(config), Ok(()));
}
